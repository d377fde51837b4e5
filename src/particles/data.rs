use super::{NeighborSearcherKind, PointNeighborSearcher};
use crate::error::{Result, SimulationError};
use crate::math::{Point3, Vec3};
use crate::serialization as ser;
use std::str::FromStr;

/// Handle for a user-added particle channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelId(pub usize);

/// Structure-of-arrays particle store: dense columns indexed by particle id.
/// Mass and kernel radius are properties of the system, not per-particle.
/// Ids are not stable across removals.
pub struct ParticleSystemData {
    radius: f64,
    mass: f64,

    positions: Vec<Point3>,
    velocities: Vec<Vec3>,
    forces: Vec<Vec3>,

    scalar_channels: Vec<(String, Vec<f64>)>,
    vector_channels: Vec<(String, Vec<Vec3>)>,

    searcher_kind: NeighborSearcherKind,
    neighbor_searcher: Option<Box<dyn PointNeighborSearcher>>,
    neighbor_search_radius: f64,
    neighbor_lists: Vec<Vec<usize>>,
}

impl ParticleSystemData {
    pub fn new() -> Self {
        ParticleSystemData {
            radius: 1e-3,
            mass: 1e-3,
            positions: Vec::new(),
            velocities: Vec::new(),
            forces: Vec::new(),
            scalar_channels: Vec::new(),
            vector_channels: Vec::new(),
            searcher_kind: NeighborSearcherKind::ParallelHashGrid,
            neighbor_searcher: None,
            neighbor_search_radius: 0.0,
            neighbor_lists: Vec::new(),
        }
    }

    pub fn number_of_particles(&self) -> usize {
        self.positions.len()
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }

    pub fn set_radius(&mut self, radius: f64) {
        self.radius = radius.max(0.0);
    }

    pub fn mass(&self) -> f64 {
        self.mass
    }

    pub fn set_mass(&mut self, mass: f64) {
        self.mass = mass.max(0.0);
    }

    pub fn positions(&self) -> &[Point3] {
        &self.positions
    }

    /// Mutating positions invalidates the neighbor searcher.
    pub fn positions_mut(&mut self) -> &mut [Point3] {
        self.invalidate_neighbor_searcher();
        &mut self.positions
    }

    pub fn velocities(&self) -> &[Vec3] {
        &self.velocities
    }

    pub fn velocities_mut(&mut self) -> &mut [Vec3] {
        &mut self.velocities
    }

    pub fn forces(&self) -> &[Vec3] {
        &self.forces
    }

    pub fn forces_mut(&mut self) -> &mut [Vec3] {
        &mut self.forces
    }

    pub fn set_searcher_kind(&mut self, kind: NeighborSearcherKind) {
        self.searcher_kind = kind;
        self.invalidate_neighbor_searcher();
    }

    pub fn add_particle(&mut self, position: Point3, velocity: Vec3, force: Vec3) {
        self.add_particles(&[position], &[velocity], &[force]);
    }

    /// Batched add; velocity/force slices may be shorter and are
    /// zero-padded.
    pub fn add_particles(&mut self, positions: &[Point3], velocities: &[Vec3], forces: &[Vec3]) {
        let old_count = self.number_of_particles();
        let added = positions.len();

        self.positions.extend_from_slice(positions);
        self.velocities.extend(
            (0..added).map(|i| velocities.get(i).copied().unwrap_or(Vec3::new(0.0, 0.0, 0.0))),
        );
        self.forces.extend(
            (0..added).map(|i| forces.get(i).copied().unwrap_or(Vec3::new(0.0, 0.0, 0.0))),
        );
        for (_, data) in self.scalar_channels.iter_mut() {
            data.resize(old_count + added, 0.0);
        }
        for (_, data) in self.vector_channels.iter_mut() {
            data.resize(old_count + added, Vec3::new(0.0, 0.0, 0.0));
        }
        self.invalidate_neighbor_searcher();
    }

    /// Drops every particle for which the predicate returns true, compacting
    /// all columns consistently.
    pub fn remove_particles<F: Fn(usize) -> bool>(&mut self, should_remove: F) {
        let keep: Vec<usize> = (0..self.number_of_particles())
            .filter(|i| !should_remove(*i))
            .collect();
        if keep.len() == self.number_of_particles() {
            return;
        }

        self.positions = keep.iter().map(|i| self.positions[*i]).collect();
        self.velocities = keep.iter().map(|i| self.velocities[*i]).collect();
        self.forces = keep.iter().map(|i| self.forces[*i]).collect();
        for (_, data) in self.scalar_channels.iter_mut() {
            *data = keep.iter().map(|i| data[*i]).collect();
        }
        for (_, data) in self.vector_channels.iter_mut() {
            *data = keep.iter().map(|i| data[*i]).collect();
        }
        self.invalidate_neighbor_searcher();
    }

    pub fn resize(&mut self, count: usize) {
        self.positions.resize(count, cgmath::point3(0.0, 0.0, 0.0));
        self.velocities.resize(count, Vec3::new(0.0, 0.0, 0.0));
        self.forces.resize(count, Vec3::new(0.0, 0.0, 0.0));
        for (_, data) in self.scalar_channels.iter_mut() {
            data.resize(count, 0.0);
        }
        for (_, data) in self.vector_channels.iter_mut() {
            data.resize(count, Vec3::new(0.0, 0.0, 0.0));
        }
        self.invalidate_neighbor_searcher();
    }

    pub fn clear(&mut self) {
        self.resize(0);
    }

    pub fn add_scalar_channel(&mut self, name: &str, initial: f64) -> ChannelId {
        let id = ChannelId(self.scalar_channels.len());
        self.scalar_channels
            .push((name.to_string(), vec![initial; self.number_of_particles()]));
        id
    }

    pub fn add_vector_channel(&mut self, name: &str, initial: Vec3) -> ChannelId {
        let id = ChannelId(self.vector_channels.len());
        self.vector_channels
            .push((name.to_string(), vec![initial; self.number_of_particles()]));
        id
    }

    pub fn scalar_channel(&self, id: ChannelId) -> &[f64] {
        &self.scalar_channels[id.0].1
    }

    pub fn scalar_channel_mut(&mut self, id: ChannelId) -> &mut [f64] {
        &mut self.scalar_channels[id.0].1
    }

    pub fn vector_channel(&self, id: ChannelId) -> &[Vec3] {
        &self.vector_channels[id.0].1
    }

    pub fn vector_channel_mut(&mut self, id: ChannelId) -> &mut [Vec3] {
        &mut self.vector_channels[id.0].1
    }

    pub fn find_scalar_channel(&self, name: &str) -> Option<ChannelId> {
        self.scalar_channels
            .iter()
            .position(|(n, _)| n == name)
            .map(ChannelId)
    }

    pub fn find_vector_channel(&self, name: &str) -> Option<ChannelId> {
        self.vector_channels
            .iter()
            .position(|(n, _)| n == name)
            .map(ChannelId)
    }

    /// Removing a channel shifts the ids of the channels added after it.
    pub fn remove_scalar_channel(&mut self, name: &str) {
        self.scalar_channels.retain(|(n, _)| n != name);
    }

    pub fn remove_vector_channel(&mut self, name: &str) {
        self.vector_channels.retain(|(n, _)| n != name);
    }

    fn invalidate_neighbor_searcher(&mut self) {
        self.neighbor_searcher = None;
        self.neighbor_lists.clear();
    }

    /// Construction happens-before any query; the searcher answers for the
    /// positions at build time.
    pub fn build_neighbor_searcher(&mut self, max_search_radius: f64) {
        let mut searcher = self.searcher_kind.create();
        searcher.build(&self.positions, max_search_radius);
        self.neighbor_search_radius = max_search_radius;
        self.neighbor_searcher = Some(searcher);
    }

    pub fn neighbor_searcher(&self) -> Option<&dyn PointNeighborSearcher> {
        self.neighbor_searcher.as_deref()
    }

    /// Builds per-particle neighbor id lists (excluding the particle itself).
    pub fn build_neighbor_lists(&mut self, max_search_radius: f64) {
        if self.neighbor_searcher.is_none() || self.neighbor_search_radius != max_search_radius {
            self.build_neighbor_searcher(max_search_radius);
        }
        let searcher = self
            .neighbor_searcher
            .as_deref()
            .expect("searcher was just built");

        self.neighbor_lists = self
            .positions
            .iter()
            .enumerate()
            .map(|(i, origin)| {
                let mut list = Vec::new();
                searcher.for_each_nearby_point(*origin, max_search_radius, &mut |j, _| {
                    if j != i {
                        list.push(j);
                    }
                });
                list
            })
            .collect();
    }

    pub fn neighbor_lists(&self) -> &[Vec<usize>] {
        &self.neighbor_lists
    }

    /// `{radius, mass, count, positions, velocities, forces, scalar
    /// channels, vector channels, searcher blob}`; vectors are flattened
    /// x-fastest per element.
    pub fn serialize(&self, out: &mut Vec<u8>) {
        ser::write_f64(out, self.radius);
        ser::write_f64(out, self.mass);
        ser::write_u64(out, self.number_of_particles() as u64);
        write_point3_slice(out, &self.positions);
        write_vec3_slice(out, &self.velocities);
        write_vec3_slice(out, &self.forces);

        ser::write_u64(out, self.scalar_channels.len() as u64);
        for (name, data) in &self.scalar_channels {
            ser::write_str(out, name);
            ser::write_f64_slice(out, data);
        }
        ser::write_u64(out, self.vector_channels.len() as u64);
        for (name, data) in &self.vector_channels {
            ser::write_str(out, name);
            write_vec3_slice(out, data);
        }

        // opaque searcher blob: kind name + build radius
        let mut blob = Vec::new();
        ser::write_str(&mut blob, &self.searcher_kind.to_string());
        ser::write_f64(&mut blob, self.neighbor_search_radius);
        ser::write_record(out, &blob);
    }

    pub fn deserialize(&mut self, input: &mut &[u8]) -> Result<()> {
        self.radius = ser::read_f64(input)?;
        self.mass = ser::read_f64(input)?;
        let count = ser::read_u64(input)? as usize;
        self.positions = read_point3_vec(input, count)?;
        self.velocities = read_vec3_vec(input, count)?;
        self.forces = read_vec3_vec(input, count)?;

        self.scalar_channels.clear();
        let scalar_count = ser::read_u64(input)? as usize;
        for _ in 0..scalar_count {
            let name = ser::read_str(input)?;
            let data = ser::read_f64_vec(input)?;
            if data.len() != count {
                return Err(SimulationError::Serialization(format!(
                    "scalar channel '{}' length {} != particle count {}",
                    name,
                    data.len(),
                    count
                )));
            }
            self.scalar_channels.push((name, data));
        }

        self.vector_channels.clear();
        let vector_count = ser::read_u64(input)? as usize;
        for _ in 0..vector_count {
            let name = ser::read_str(input)?;
            let data = read_vec3_vec(input, count)?;
            self.vector_channels.push((name, data));
        }

        let blob = ser::read_record(input)?;
        let mut cursor = blob;
        let kind_name = ser::read_str(&mut cursor)?;
        let radius = ser::read_f64(&mut cursor)?;
        self.searcher_kind = NeighborSearcherKind::from_str(&kind_name).map_err(|_| {
            SimulationError::Serialization(format!("unknown neighbor searcher '{}'", kind_name))
        })?;
        self.neighbor_searcher = None;
        self.neighbor_lists.clear();
        if radius > 0.0 {
            self.build_neighbor_searcher(radius);
        }
        Ok(())
    }
}

impl Default for ParticleSystemData {
    fn default() -> Self {
        Self::new()
    }
}

fn write_point3_slice(out: &mut Vec<u8>, data: &[Point3]) {
    let mut flat = Vec::with_capacity(data.len() * 3);
    for p in data {
        flat.push(p.x);
        flat.push(p.y);
        flat.push(p.z);
    }
    ser::write_f64_slice(out, &flat);
}

fn write_vec3_slice(out: &mut Vec<u8>, data: &[Vec3]) {
    let mut flat = Vec::with_capacity(data.len() * 3);
    for v in data {
        flat.push(v.x);
        flat.push(v.y);
        flat.push(v.z);
    }
    ser::write_f64_slice(out, &flat);
}

fn read_vec3_vec(input: &mut &[u8], expected: usize) -> Result<Vec<Vec3>> {
    let flat = ser::read_f64_vec(input)?;
    if flat.len() != expected * 3 {
        return Err(SimulationError::Serialization(format!(
            "vector column length {} != 3 * {}",
            flat.len(),
            expected
        )));
    }
    Ok(flat
        .chunks_exact(3)
        .map(|c| Vec3::new(c[0], c[1], c[2]))
        .collect())
}

fn read_point3_vec(input: &mut &[u8], expected: usize) -> Result<Vec<Point3>> {
    Ok(read_vec3_vec(input, expected)?
        .into_iter()
        .map(|v| cgmath::point3(v.x, v.y, v.z))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channels_stay_aligned_with_particle_count() {
        let mut data = ParticleSystemData::new();
        let heat = data.add_scalar_channel("heat", 1.0);
        data.add_particle(cgmath::point3(0.0, 0.0, 0.0), Vec3::new(1.0, 0.0, 0.0), Vec3::new(0.0, 0.0, 0.0));
        data.add_particle(cgmath::point3(1.0, 0.0, 0.0), Vec3::new(0.0, 0.0, 0.0), Vec3::new(0.0, 0.0, 0.0));
        assert_eq!(data.scalar_channel(heat).len(), 2);
        // channels added before particles existed get zero-extended
        assert_eq!(data.scalar_channel(heat), &[1.0, 0.0][..]);

        data.remove_particles(|i| i == 0);
        assert_eq!(data.number_of_particles(), 1);
        assert_eq!(data.positions()[0], cgmath::point3(1.0, 0.0, 0.0));
        assert_eq!(data.scalar_channel(heat).len(), 1);
    }

    #[test]
    fn neighbor_lists_exclude_self() {
        let mut data = ParticleSystemData::new();
        data.add_particles(
            &[
                cgmath::point3(0.0, 0.0, 0.0),
                cgmath::point3(0.05, 0.0, 0.0),
                cgmath::point3(0.9, 0.0, 0.0),
            ],
            &[],
            &[],
        );
        data.build_neighbor_lists(0.1);
        assert_eq!(data.neighbor_lists()[0], vec![1]);
        assert_eq!(data.neighbor_lists()[1], vec![0]);
        assert!(data.neighbor_lists()[2].is_empty());
    }

    #[test]
    fn serialize_round_trip() {
        let mut data = ParticleSystemData::new();
        data.set_radius(0.02);
        data.set_mass(0.5);
        data.add_particles(
            &[cgmath::point3(0.1, 0.2, 0.3), cgmath::point3(0.4, 0.5, 0.6)],
            &[Vec3::new(1.0, 2.0, 3.0)],
            &[],
        );
        let heat = data.add_scalar_channel("heat", 7.0);
        data.scalar_channel_mut(heat)[1] = -1.0;
        data.add_vector_channel("spin", Vec3::new(0.0, 1.0, 0.0));
        data.build_neighbor_searcher(0.1);

        let mut buf = Vec::new();
        data.serialize(&mut buf);

        let mut other = ParticleSystemData::new();
        let mut cursor = buf.as_slice();
        other.deserialize(&mut cursor).unwrap();
        assert!(cursor.is_empty());
        assert_eq!(other.number_of_particles(), 2);
        assert_eq!(other.radius(), 0.02);
        assert_eq!(other.mass(), 0.5);
        assert_eq!(other.positions()[1], cgmath::point3(0.4, 0.5, 0.6));
        assert_eq!(other.velocities()[0], Vec3::new(1.0, 2.0, 3.0));
        let heat = other.find_scalar_channel("heat").unwrap();
        assert_eq!(other.scalar_channel(heat), &[7.0, -1.0][..]);
        assert!(other.neighbor_searcher().is_some());
    }
}
