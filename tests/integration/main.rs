//! Integration test harness.

mod mock_data;
mod simulation_dataset;
mod unroll;
