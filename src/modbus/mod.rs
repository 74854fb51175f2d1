//! # Modbus Module
//!
//! Modbus TCP server support for the simulated PLC device. The server
//! exposes the shared register datastore to external SCADA clients; see
//! [`modbus_server`] for the register map and request handling.

pub mod modbus_server;

pub use modbus_server::PlcModbusServer;
