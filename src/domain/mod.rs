// Domain layer - samples, series and cycle outcomes
pub mod cycle;
pub mod sample;
pub mod series;
