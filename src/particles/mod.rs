mod data;
mod hash_grid;
mod kd_tree;
mod neighbor;

pub use data::{ChannelId, ParticleSystemData};
pub use hash_grid::{PointHashGridSearcher, PointParallelHashGridSearcher};
pub use kd_tree::PointKdTreeSearcher;
pub use neighbor::{PointNeighborSearcher, PointSimpleListSearcher};

use strum_macros::{Display, EnumIter, EnumString};

/// Named searcher kinds; the name is what the particle-system persistence
/// format stores to re-hydrate the right type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumIter, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum NeighborSearcherKind {
    List,
    KdTree,
    HashGrid,
    ParallelHashGrid,
}

impl NeighborSearcherKind {
    pub fn create(&self) -> Box<dyn PointNeighborSearcher> {
        match self {
            NeighborSearcherKind::List => Box::new(PointSimpleListSearcher::new()),
            NeighborSearcherKind::KdTree => Box::new(PointKdTreeSearcher::new()),
            NeighborSearcherKind::HashGrid => Box::new(PointHashGridSearcher::new()),
            NeighborSearcherKind::ParallelHashGrid => {
                Box::new(PointParallelHashGridSearcher::new())
            }
        }
    }
}
