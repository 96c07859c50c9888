//! Polar Verity Sense BLE sensor client (§4.A).

mod client;
mod protocol;

pub use client::SensorClient;
pub use protocol::{decode_ppi_frame, decode_standard_hr_frame, PpiFrame, PpiSample};
