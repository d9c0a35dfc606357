/// TCP simulator with a drifting measurement value
use std::sync::{Arc, Mutex};
use std::time::Duration;

use modbus_sim::codec::{DataType, Value};
use modbus_sim::{PointStore, RegisterPoint, SimServer, SyncEngine};
use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

#[tokio::main]
async fn main() {
    env_logger::init();

    let server = SimServer::new();
    let store = Arc::new(Mutex::new(PointStore::new()));
    let mut engine = SyncEngine::new(Arc::new(server.clone()), Arc::clone(&store));

    let sensor = RegisterPoint::new("water pressure", 0x0010, DataType::Float32);
    let sensor_id = sensor.id.clone();
    engine.upsert_point(sensor.clone()).await.unwrap();

    server.start(5502).await.unwrap();
    engine.start(Duration::from_secs(1));
    println!("serving on {}", server.local_addr().unwrap());

    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let noise = Normal::new(0.0, 0.2).unwrap();
    let mut level = 2.5f64;

    loop {
        tokio::time::sleep(Duration::from_millis(500)).await;
        level += noise.sample(&mut rng);
        let raw = sensor.from_engineering(Value::Number(level)).unwrap();
        server.set_raw(&sensor_id, &raw);
        println!("pressure = {level:.3}");
    }
}
