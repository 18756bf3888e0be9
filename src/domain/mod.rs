// Domain layer - value objects and export policy rules

pub mod model;
pub mod rules;
