//! Cost & Token Attribution (§4.5).

pub mod pricing;

pub use pricing::{ModelPricing, PricingTable};
