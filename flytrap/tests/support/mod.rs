pub mod harness;

pub use harness::{Harness, TestClient};
