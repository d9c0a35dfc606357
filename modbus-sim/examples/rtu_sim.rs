/// RTU Modbus register point simulator
use modbus_sim::codec::DataType;
use modbus_sim::server::spawn_rtu_server;
use modbus_sim::{RegisterPoint, SimServer};

#[tokio::main]
async fn main() {
    env_logger::init();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/dev/ttyUSB0".to_string());

    let server = SimServer::new();
    let mut counter = RegisterPoint::new("cycle counter", 0x0000, DataType::Uint32);
    counter.init_value = vec![0x00, 0x00, 0x00, 0x01];
    server.set_point(counter);

    let handle = spawn_rtu_server(&server, &path, 19200).unwrap();
    handle.await.unwrap();
}
