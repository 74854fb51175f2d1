// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-scadasim project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Modbus server implementation for the simulated PLC device
//!
//! For avoiding confusion with the Modbus master/slave terminology, this module uses
//! the terms "server" and "client" instead. The server is the device that provides data,
//! while the client is the device that requests data.
//!
//! The server is a thin bridge: every request translates to one call on the
//! shared [`DataStore`] access layer, so external clients and the behavior
//! tasks operate on the same registers under the same bank locks.
//!
//! ## Register Map
//!
//! The register layout is entirely configuration-driven; each bank spans
//! `[start_addr, start_addr + len)` as restored from the backup file.
//!
//! | Bank | Function Codes | Access |
//! |------|----------------|--------|
//! | Discrete inputs | 0x02 | read only |
//! | Coils | 0x01, 0x05, 0x0F | read/write |
//! | Holding registers | 0x03, 0x06, 0x10 | read/write |
//! | Input registers | 0x04 | read only |
//!
//! A request outside a bank's range answers `IllegalDataAddress`; any other
//! function code answers `IllegalFunction`.

use std::future;
use std::sync::Arc;

use log::{debug, error};

use tokio_modbus::prelude::*;

use crate::datastore::{AddressingError, DataStore};

/// A Modbus TCP service serving the shared device datastore.
///
/// One instance is created per client connection; all instances share the
/// same `Arc<DataStore>`, and with it the bank locks that order their
/// accesses against the behavior tasks and the backup manager.
pub struct PlcModbusServer {
    store: Arc<DataStore>,
}

impl PlcModbusServer {
    /// Create a service instance over the shared datastore.
    pub fn new(store: &Arc<DataStore>) -> Self {
        Self {
            store: Arc::clone(store),
        }
    }
}

impl tokio_modbus::server::Service for PlcModbusServer {
    type Request = Request<'static>;
    type Response = Response;
    type Exception = ExceptionCode;
    type Future = future::Ready<Result<Self::Response, Self::Exception>>;

    /// Process a Modbus request and provide a response
    ///
    /// This method handles the following Modbus function codes:
    /// - 0x01: Read Coils
    /// - 0x02: Read Discrete Inputs
    /// - 0x03: Read Holding Registers
    /// - 0x04: Read Input Registers
    /// - 0x05: Write Single Coil
    /// - 0x06: Write Single Register
    /// - 0x0F: Write Multiple Coils
    /// - 0x10: Write Multiple Registers
    ///
    /// Any other function code will return an IllegalFunction exception.
    fn call(&self, req: Self::Request) -> Self::Future {
        debug!("Received Modbus request: {:?}", req);

        let res = match req {
            Request::ReadCoils(addr, cnt) => self
                .store
                .read_coils(addr, cnt)
                .map(Response::ReadCoils)
                .map_err(illegal_data_address),
            Request::ReadDiscreteInputs(addr, cnt) => self
                .store
                .read_discrete_inputs(addr, cnt)
                .map(Response::ReadDiscreteInputs)
                .map_err(illegal_data_address),
            Request::ReadHoldingRegisters(addr, cnt) => self
                .store
                .read_holding_registers(addr, cnt)
                .map(Response::ReadHoldingRegisters)
                .map_err(illegal_data_address),
            Request::ReadInputRegisters(addr, cnt) => self
                .store
                .read_input_registers(addr, cnt)
                .map(Response::ReadInputRegisters)
                .map_err(illegal_data_address),
            Request::WriteSingleCoil(addr, value) => self
                .store
                .write_coils(addr, &[value])
                .map(|()| Response::WriteSingleCoil(addr, value))
                .map_err(illegal_data_address),
            Request::WriteMultipleCoils(addr, values) => self
                .store
                .write_coils(addr, &values)
                .map(|()| Response::WriteMultipleCoils(addr, values.len() as u16))
                .map_err(illegal_data_address),
            Request::WriteSingleRegister(addr, value) => self
                .store
                .write_holding_registers(addr, &[value])
                .map(|()| Response::WriteSingleRegister(addr, value))
                .map_err(illegal_data_address),
            Request::WriteMultipleRegisters(addr, values) => self
                .store
                .write_holding_registers(addr, &values)
                .map(|()| Response::WriteMultipleRegisters(addr, values.len() as u16))
                .map_err(illegal_data_address),
            _ => {
                error!(
                    "Exception::IllegalFunction - Unimplemented function code in request: {req:?}"
                );
                Err(ExceptionCode::IllegalFunction)
            }
        };

        // Log the result
        if let Err(e) = &res {
            error!("Modbus request error: {:?}", e);
        }

        future::ready(res)
    }
}

fn illegal_data_address(err: AddressingError) -> ExceptionCode {
    error!("Exception::IllegalDataAddress - {}", err);
    ExceptionCode::IllegalDataAddress
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::{BankImage, DataStoreImage};
    use tokio_modbus::server::Service;

    fn service() -> PlcModbusServer {
        let store = Arc::new(DataStore::new(DataStoreImage {
            di: BankImage {
                start_addr: 1,
                values: vec![true, false],
            },
            co: BankImage {
                start_addr: 1,
                values: vec![false, false],
            },
            hr: BankImage {
                start_addr: 1,
                values: vec![10, 20, 30],
            },
            ir: BankImage {
                start_addr: 1,
                values: vec![7],
            },
        }));
        PlcModbusServer::new(&store)
    }

    #[tokio::test]
    async fn test_read_requests_reach_every_bank() {
        let service = service();

        let res = service
            .call(Request::ReadHoldingRegisters(1, 3))
            .await
            .unwrap();
        assert_eq!(res, Response::ReadHoldingRegisters(vec![10, 20, 30]));

        let res = service.call(Request::ReadInputRegisters(1, 1)).await.unwrap();
        assert_eq!(res, Response::ReadInputRegisters(vec![7]));

        let res = service.call(Request::ReadCoils(1, 2)).await.unwrap();
        assert_eq!(res, Response::ReadCoils(vec![false, false]));

        let res = service
            .call(Request::ReadDiscreteInputs(1, 2))
            .await
            .unwrap();
        assert_eq!(res, Response::ReadDiscreteInputs(vec![true, false]));
    }

    #[tokio::test]
    async fn test_writes_are_visible_to_subsequent_reads() {
        let service = service();

        service
            .call(Request::WriteSingleRegister(2, 99))
            .await
            .unwrap();
        service
            .call(Request::WriteMultipleCoils(1, vec![true, true].into()))
            .await
            .unwrap();

        let res = service
            .call(Request::ReadHoldingRegisters(1, 3))
            .await
            .unwrap();
        assert_eq!(res, Response::ReadHoldingRegisters(vec![10, 99, 30]));
        let res = service.call(Request::ReadCoils(1, 2)).await.unwrap();
        assert_eq!(res, Response::ReadCoils(vec![true, true]));
    }

    #[tokio::test]
    async fn test_out_of_range_answers_illegal_data_address() {
        let service = service();

        let err = service
            .call(Request::ReadHoldingRegisters(1, 9))
            .await
            .unwrap_err();
        assert_eq!(err, ExceptionCode::IllegalDataAddress);

        let err = service
            .call(Request::WriteSingleRegister(0, 1))
            .await
            .unwrap_err();
        assert_eq!(err, ExceptionCode::IllegalDataAddress);
    }

    #[tokio::test]
    async fn test_unsupported_function_answers_illegal_function() {
        let service = service();
        let err = service
            .call(Request::ReadWriteMultipleRegisters(1, 1, 1, vec![1].into()))
            .await
            .unwrap_err();
        assert_eq!(err, ExceptionCode::IllegalFunction);
    }
}
