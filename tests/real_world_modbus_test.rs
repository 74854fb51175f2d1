// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-scadasim project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Real-world integration test for the Modbus TCP server
//!
//! This test seeds a backup, starts a full device instance and talks to it
//! over a live Modbus TCP connection: reading every bank, writing holding
//! registers and coils, observing a behavior mutate its range, and checking
//! that out-of-range requests answer with a Modbus exception.

use anyhow::Result;
use rust_scadasim::{backup, config::Config, daemon::launch_daemon::Daemon};
use std::{io::Write, time::Duration};
use tokio::time::sleep;
use tokio_modbus::client::{tcp::connect, Reader, Writer};

const MASTER_YAML: &str = r#"
MASTER:
  num_of_PLC: 1
PLC 0:
  DATASTORE:
    hr:
      start_addr: 1
      values: [10, 20, 30]
      behavior_1:
        type: linear
        time: 0.05
        address: 1
        count: 1
        variance: 5
    ir:
      start_addr: 1
      values: [7, 8]
    co:
      start_addr: 1
      values: [1, 0]
      behavior_1:
        type: constant
        time: 0.05
        address: 1
        count: 1
        num: 1
    di:
      start_addr: 1
      values: [0, 1]
  SERVER:
    type: tcp
    framer: NONE
    address: 127.0.0.1
    port: 5502
  LOGGING:
    file: STDOUT
    format: NONE
    logging_level: DEBUG
"#;

#[tokio::test]
async fn test_real_world_modbus_server() -> Result<()> {
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Debug)
        .is_test(true)
        .try_init();

    // Write the master configuration and seed the device backup
    let dir = tempfile::tempdir()?;
    let config_path = dir.path().join("master.yaml");
    std::fs::File::create(&config_path)?.write_all(MASTER_YAML.as_bytes())?;
    let backup_path = dir.path().join("backup_0.yaml");

    let config = Config::from_file(&config_path, 0)?;
    assert!(backup::seed(&backup_path, &config.datastore)?);

    // Launch the device daemon (behaviors, backup manager, Modbus server)
    let mut daemon = Daemon::new();
    daemon.launch(&config, &backup_path).await?;

    // Give the server time to bind and the behaviors time to tick
    sleep(Duration::from_millis(500)).await;

    let socket_addr: std::net::SocketAddr = "127.0.0.1:5502".parse()?;
    let mut ctx = connect(socket_addr).await?;

    // Every bank answers reads
    let hr = ctx.read_holding_registers(1, 3).await?.expect("modbus exception");
    assert_eq!(hr.len(), 3);
    // behavior_1 has been adding 5 per 50ms tick to register 1
    assert!(hr[0] > 10, "linear behavior should have advanced: {:?}", hr);
    assert_eq!(&hr[1..], &[20, 30]);

    let ir = ctx.read_input_registers(1, 2).await?.expect("modbus exception");
    assert_eq!(ir, vec![7, 8]);

    let di = ctx.read_discrete_inputs(1, 2).await?.expect("modbus exception");
    assert_eq!(di, vec![false, true]);

    // The constant behavior keeps coil 1 closed
    let co = ctx.read_coils(1, 2).await?.expect("modbus exception");
    assert!(co[0]);

    // Client writes land in the shared datastore
    ctx.write_single_register(2, 77)
        .await?
        .expect("modbus exception");
    let hr = ctx.read_holding_registers(2, 1).await?.expect("modbus exception");
    assert_eq!(hr, vec![77]);

    ctx.write_multiple_registers(2, &[41, 42])
        .await?
        .expect("modbus exception");
    let hr = ctx.read_holding_registers(2, 2).await?.expect("modbus exception");
    assert_eq!(hr, vec![41, 42]);

    ctx.write_single_coil(2, true)
        .await?
        .expect("modbus exception");
    let co = ctx.read_coils(2, 1).await?.expect("modbus exception");
    assert_eq!(co, vec![true]);

    // Out-of-range requests answer IllegalDataAddress, not a dead connection
    let exception = ctx.read_holding_registers(1, 10).await?;
    assert!(
        exception.is_err(),
        "expected a Modbus exception: {:?}",
        exception
    );

    // The backup manager persists the live values once per second
    sleep(Duration::from_millis(1200)).await;
    let snapshot = backup::restore(&backup_path)?;
    assert_eq!(snapshot.hr.values.len(), 3);
    assert!(snapshot.hr.values[0] > 10);

    drop(ctx);
    daemon.shutdown();
    daemon.join().await?;
    Ok(())
}
