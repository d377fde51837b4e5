use enumflags2::{bitflags, BitFlags};

/// Domain face bits, shared by closed-domain boundary handling and the
/// surface extractor's boundary closure.
#[bitflags]
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Left = 0b000001,  // -x
    Right = 0b000010, // +x
    Down = 0b000100,  // -y
    Up = 0b001000,    // +y
    Back = 0b010000,  // -z
    Front = 0b100000, // +z
}

pub type DirectionFlags = BitFlags<Direction>;
