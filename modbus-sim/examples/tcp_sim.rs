/// TCP Modbus register point simulator
use std::sync::{Arc, Mutex};
use std::time::Duration;

use modbus_sim::codec::{hex_bytes, DataType};
use modbus_sim::point::format_addr;
use modbus_sim::{PointStore, RegisterPoint, SimServer, SyncEngine};

#[tokio::main]
async fn main() {
    env_logger::init();

    let server = SimServer::new();
    let store = Arc::new(Mutex::new(PointStore::new()));
    let mut engine = SyncEngine::new(Arc::new(server.clone()), Arc::clone(&store));

    let mut temperature = RegisterPoint::new("temperature", 0x0100, DataType::Uint16);
    temperature.scale = 0.1;
    temperature.offset = -40.0;
    temperature.init_value = 500u16.to_be_bytes().to_vec();
    engine.upsert_point(temperature).await.unwrap();

    let setpoint = RegisterPoint::new("power setpoint", 0x0200, DataType::Float32);
    engine.upsert_point(setpoint).await.unwrap();

    let valve = RegisterPoint::new("valve open", 0x0300, DataType::Bool);
    engine.upsert_point(valve).await.unwrap();

    server.start(5502).await.unwrap();
    engine.start(Duration::from_secs(1));
    println!("serving on {}", server.local_addr().unwrap());

    loop {
        tokio::time::sleep(Duration::from_secs(1)).await;
        let store = store.lock().unwrap();
        for point in store.list() {
            let raw = store.raw_value(&point.id).unwrap();
            println!(
                "{}  {:16}  {}  {}",
                format_addr(point.start_addr),
                point.description,
                hex_bytes(raw),
                point.display_value(raw).unwrap(),
            );
        }
        println!();
    }
}
