pub mod namespacelabel;

pub use namespacelabel::*;
