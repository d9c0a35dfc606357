//! Simulated Modbus register points based on [tokio-modbus](https://github.com/slowtec/tokio-modbus).

//! ## Overview
//!
//! The crate manages a set of simulated register points for a Modbus test
//! server. Each point maps a span of 16-bit registers to an engineering
//! value under a configurable data type, byte order and linear
//! scale/offset transform.
//!
//! - [`codec`] converts between raw register buffers and typed values,
//! - [`point::RegisterPoint`] describes one point and its edit-time rules,
//! - [`store::PointStore`] is the authoritative collection plus the latest
//!   polled raw values,
//! - [`sync::SyncEngine`] keeps the store in sync with a serving backend
//!   through periodic polls and write-then-resync,
//! - [`server::SimServer`] is that backend: a register bank served to
//!   Modbus masters over TCP (and RTU with the `serial` feature),
//! - [`portable`] imports and exports the collection as a JSON document.
//!
//! See [examples/](https://github.com/modbus-sim/modbus-sim/tree/main/modbus-sim/examples) for simple usage.

/// Conversions between raw register buffers and typed values
pub mod codec;
/// Register point model and validation
pub mod point;
/// Portable JSON import/export of point collections
pub mod portable;
/// Simulated Modbus slave serving the register bank
pub mod server;
/// Authoritative point collection and raw value snapshots
pub mod store;
/// Backend trait and the value synchronization engine
pub mod sync;

pub use codec::{ByteOrder, CodecError, DataType, Value};
pub use point::{RegisterPoint, ValidationError};
pub use portable::PortableError;
pub use server::SimServer;
pub use store::{OverlapPolicy, PointStore, StoreError};
pub use sync::{RegisterBackend, StepDirection, SyncEngine, SyncError};
