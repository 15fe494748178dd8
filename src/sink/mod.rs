pub mod aggregated;
