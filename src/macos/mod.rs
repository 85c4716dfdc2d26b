pub mod apple_double;

pub use apple_double::AppleDoubleWriter;
