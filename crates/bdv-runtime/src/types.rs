use std::fmt;

/// Opaque id of a viewer living inside the embedded runtime.
///
/// This is a back-reference into remote state, not an owning pointer; the
/// owning side is [`crate::Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle(pub i32);

impl SessionHandle {
    pub fn raw(self) -> i32 {
        self.0
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Row-major 3x4 affine view transform: the upper three rows of a 4x4
/// matrix, linear part in columns 0..3 and translation in column 3.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform(pub [f64; 12]);

impl Transform {
    pub const LEN: usize = 12;

    pub fn identity() -> Self {
        Self([
            1.0, 0.0, 0.0, 0.0, //
            0.0, 1.0, 0.0, 0.0, //
            0.0, 0.0, 1.0, 0.0,
        ])
    }

    pub fn from_rows(rows: [[f64; 4]; 3]) -> Self {
        let mut m = [0.0; 12];
        for (r, row) in rows.iter().enumerate() {
            m[r * 4..r * 4 + 4].copy_from_slice(row);
        }
        Self(m)
    }

    pub fn row(&self, r: usize) -> [f64; 4] {
        let mut row = [0.0; 4];
        row.copy_from_slice(&self.0[r * 4..r * 4 + 4]);
        row
    }

    pub fn translation(&self) -> [f64; 3] {
        [self.0[3], self.0[7], self.0[11]]
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

impl From<[f64; 12]> for Transform {
    fn from(m: [f64; 12]) -> Self {
        Self(m)
    }
}

/// Packed 32-bit alpha-red-green-blue color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Argb(pub u32);

impl Argb {
    pub const WHITE: Argb = Argb(0xffff_ffff);

    pub fn from_channels(a: u8, r: u8, g: u8, b: u8) -> Self {
        Self(u32::from_be_bytes([a, r, g, b]))
    }

    pub fn alpha(self) -> u8 {
        self.0.to_be_bytes()[0]
    }

    pub fn red(self) -> u8 {
        self.0.to_be_bytes()[1]
    }

    pub fn green(self) -> u8 {
        self.0.to_be_bytes()[2]
    }

    pub fn blue(self) -> u8 {
        self.0.to_be_bytes()[3]
    }

    /// Bit-for-bit reinterpretation for the `int` the viewer stores.
    pub fn to_i32(self) -> i32 {
        self.0.cast_signed()
    }

    pub fn from_i32(v: i32) -> Self {
        Self(v.cast_unsigned())
    }
}

impl fmt::Display for Argb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

/// Display settings of one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceParams {
    pub min: i32,
    pub max: i32,
    pub color: Argb,
    pub visible: bool,
}
