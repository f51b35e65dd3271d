mod resource;

pub use resource::{RType, ResourceLink};
