mod image;
mod registry;
mod store;

pub use image::ProcessImage;
pub use registry::UnitRegistry;
pub use store::SlaveStore;
