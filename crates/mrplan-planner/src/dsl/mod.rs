//! Text front-ends for building input plans.

pub mod expr;
pub mod yaml;
