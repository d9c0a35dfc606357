use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use futures::future;
use log::{debug, error, warn};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_modbus::{server, Exception, Request, Response};

use crate::codec::{self, Address, Quantity, Word};
use crate::point::RegisterPoint;
use crate::sync::RegisterBackend;

/// A raw Modbus register map shared by every function code the server
/// answers. Coil-style requests see the same words through a bit view.
#[derive(Debug, Clone, Default)]
pub struct RegisterBank(HashMap<Address, Word>);

impl RegisterBank {
    /// Read `cnt` consecutive registers starting at `addr`.
    pub fn read(&self, addr: Address, cnt: Quantity) -> Result<Vec<Word>, Exception> {
        let mut response_values = vec![0; cnt.into()];
        for i in 0..cnt {
            let reg_addr = addr + i;
            if let Some(r) = self.0.get(&reg_addr) {
                response_values[i as usize] = *r;
            } else {
                warn!("no register at address {reg_addr:#06X}");
                return Err(Exception::IllegalDataAddress);
            }
        }

        Ok(response_values)
    }

    /// Write `words` into existing consecutive registers starting at `addr`.
    pub fn write(&mut self, addr: Address, words: &[Word]) -> Result<(), Exception> {
        for (i, value) in words.iter().enumerate() {
            let reg_addr = addr + i as Address;
            if let Some(r) = self.0.get_mut(&reg_addr) {
                *r = *value;
            } else {
                warn!("no register at address {reg_addr:#06X}");
                return Err(Exception::IllegalDataAddress);
            }
        }

        Ok(())
    }

    /// Seed the span of a point, keeping values already present. Vacant
    /// registers take the point's initial bytes, high byte first.
    fn seed(&mut self, point: &RegisterPoint) {
        let init_words = codec::bytes_to_words(&point.init_value);
        for offset in 0..point.addr_size {
            let Some(addr) = point.start_addr.checked_add(offset) else {
                break;
            };
            self.0
                .entry(addr)
                .or_insert_with(|| init_words.get(usize::from(offset)).copied().unwrap_or(0));
        }
    }

    /// Free the span of a point.
    fn free(&mut self, point: &RegisterPoint) {
        for offset in 0..point.addr_size {
            let Some(addr) = point.start_addr.checked_add(offset) else {
                break;
            };
            self.0.remove(&addr);
        }
    }

    /// Assemble a point's span into its raw byte buffer. Registers that were
    /// never seeded read as zero.
    fn collect(&self, point: &RegisterPoint) -> Vec<u8> {
        let words: Vec<Word> = (0..point.addr_size)
            .map(|offset| {
                point
                    .start_addr
                    .checked_add(offset)
                    .and_then(|addr| self.0.get(&addr).copied())
                    .unwrap_or(0)
            })
            .collect();
        codec::words_to_bytes(&words)
    }

    /// Scatter a raw byte buffer across a point's span. A short buffer
    /// zero-fills the remaining registers.
    fn scatter(&mut self, point: &RegisterPoint, data: &[u8]) {
        let words = codec::bytes_to_words(data);
        for offset in 0..point.addr_size {
            let Some(addr) = point.start_addr.checked_add(offset) else {
                break;
            };
            self.0
                .insert(addr, words.get(usize::from(offset)).copied().unwrap_or(0));
        }
    }
}

#[derive(Debug, Default)]
struct ServerState {
    points: HashMap<String, RegisterPoint>,
    bank: RegisterBank,
    listener: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

/// Simulated Modbus slave serving the register bank over TCP (and RTU with
/// the `serial` feature).
///
/// The bank is the live state a Modbus master reads and writes; the point
/// bookkeeping maps spans of it to stable ids for the sync engine.
#[derive(Debug, Clone, Default)]
pub struct SimServer {
    state: Arc<Mutex<ServerState>>,
}

impl SimServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the TCP listener and spawn the accept loop.
    pub async fn start(&self, port: u16) -> Result<(), io::Error> {
        if self.is_running() {
            return Err(io::Error::new(
                io::ErrorKind::AddrInUse,
                "modbus server already started",
            ));
        }

        let socket_addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = TcpListener::bind(socket_addr).await?;
        let local_addr = listener.local_addr()?;
        debug!("modbus server listening on {local_addr}");

        let service = self.clone();
        let handle = tokio::spawn(async move {
            let server = server::tcp::Server::new(listener);
            let new_service = |_socket_addr| Ok(Some(service.clone()));
            let on_connected = |stream, socket_addr| async move {
                server::tcp::accept_tcp_connection(stream, socket_addr, new_service)
            };
            let on_process_error = |err| {
                error!("{err}");
            };
            if let Err(err) = server.serve(&on_connected, on_process_error).await {
                error!("modbus server terminated: {err}");
            }
        });

        let mut state = self.state.lock().unwrap();
        if state.listener.is_some() {
            handle.abort();
            return Err(io::Error::new(
                io::ErrorKind::AddrInUse,
                "modbus server already started",
            ));
        }
        state.listener = Some(handle);
        state.local_addr = Some(local_addr);
        Ok(())
    }

    /// Stop serving. Registered points and register values stay in place
    /// for the next start.
    pub fn stop(&self) {
        let mut state = self.state.lock().unwrap();
        if let Some(handle) = state.listener.take() {
            handle.abort();
            state.local_addr = None;
            debug!("modbus server stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().unwrap().listener.is_some()
    }

    /// Address the TCP listener is bound to while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.state.lock().unwrap().local_addr
    }

    /// Register a point or replace it, seeding vacant registers in its span
    /// from the initial value.
    pub fn set_point(&self, point: RegisterPoint) {
        let mut state = self.state.lock().unwrap();
        if let Some(previous) = state.points.remove(&point.id) {
            if previous.start_addr != point.start_addr || previous.addr_size != point.addr_size {
                state.bank.free(&previous);
            }
        }
        state.bank.seed(&point);
        state.points.insert(point.id.clone(), point);
    }

    /// Drop a point and free its register span.
    pub fn remove_point(&self, id: &str) {
        let mut state = self.state.lock().unwrap();
        let Some(point) = state.points.remove(id) else {
            return;
        };
        state.bank.free(&point);
    }

    /// Reset the bank to exactly this set of points.
    pub fn init_points(&self, points: Vec<RegisterPoint>) {
        let mut state = self.state.lock().unwrap();
        state.points.clear();
        state.bank = RegisterBank::default();
        for point in points {
            state.bank.seed(&point);
            state.points.insert(point.id.clone(), point);
        }
    }

    /// Registered points ordered by start address.
    pub fn points(&self) -> Vec<RegisterPoint> {
        let state = self.state.lock().unwrap();
        let mut points: Vec<RegisterPoint> = state.points.values().cloned().collect();
        points.sort_by_key(|p| p.start_addr);
        points
    }

    /// Snapshot every point's span as raw byte buffers keyed by id.
    pub fn all_values(&self) -> HashMap<String, Vec<u8>> {
        let state = self.state.lock().unwrap();
        state
            .points
            .iter()
            .map(|(id, point)| (id.clone(), state.bank.collect(point)))
            .collect()
    }

    /// Overwrite a point's span with a raw byte buffer. Unknown ids are
    /// ignored the way an unmapped Modbus write would be.
    pub fn set_raw(&self, id: &str, data: &[u8]) {
        let mut state = self.state.lock().unwrap();
        let Some(point) = state.points.get(id).cloned() else {
            warn!("set_raw for unknown point {id:?}");
            return;
        };
        state.bank.scatter(&point, data);
    }

    fn service_call(state: &mut ServerState, req: Request<'static>) -> Result<Response, Exception> {
        match req {
            Request::ReadHoldingRegisters(addr, cnt) => state
                .bank
                .read(addr, cnt)
                .map(Response::ReadHoldingRegisters),
            Request::ReadInputRegisters(addr, cnt) => {
                state.bank.read(addr, cnt).map(Response::ReadInputRegisters)
            }
            Request::WriteSingleRegister(addr, value) => state
                .bank
                .write(addr, std::slice::from_ref(&value))
                .map(|_| Response::WriteSingleRegister(addr, value)),
            Request::WriteMultipleRegisters(addr, values) => state
                .bank
                .write(addr, &values)
                .map(|_| Response::WriteMultipleRegisters(addr, values.len() as u16)),
            Request::ReadCoils(addr, cnt) => state
                .bank
                .read(addr, cnt)
                .map(|words| Response::ReadCoils(words.iter().map(|w| *w != 0).collect())),
            Request::ReadDiscreteInputs(addr, cnt) => state
                .bank
                .read(addr, cnt)
                .map(|words| Response::ReadDiscreteInputs(words.iter().map(|w| *w != 0).collect())),
            Request::WriteSingleCoil(addr, on) => {
                let word: Word = if on { 0xFF00 } else { 0x0000 };
                state
                    .bank
                    .write(addr, std::slice::from_ref(&word))
                    .map(|_| Response::WriteSingleCoil(addr, on))
            }
            Request::WriteMultipleCoils(addr, coils) => {
                let words: Vec<Word> = coils
                    .iter()
                    .map(|on| if *on { 0xFF00 } else { 0x0000 })
                    .collect();
                state
                    .bank
                    .write(addr, &words)
                    .map(|_| Response::WriteMultipleCoils(addr, words.len() as u16))
            }
            _ => {
                warn!("unimplemented function code in request: {req:?}");
                Err(Exception::IllegalFunction)
            }
        }
    }
}

impl tokio_modbus::server::Service for SimServer {
    type Request = Request<'static>;
    type Response = Response;
    type Exception = Exception;
    type Future = future::Ready<Result<Self::Response, Self::Exception>>;

    fn call(&self, req: Self::Request) -> Self::Future {
        let state = &mut self.state.lock().unwrap();
        future::ready(Self::service_call(state, req))
    }
}

#[async_trait]
impl RegisterBackend for SimServer {
    async fn start_server(&self, port: u16) -> Result<(), io::Error> {
        self.start(port).await
    }

    async fn stop_server(&self) -> Result<(), io::Error> {
        self.stop();
        Ok(())
    }

    async fn list_configs(&self) -> Result<Vec<RegisterPoint>, io::Error> {
        Ok(self.points())
    }

    async fn upsert_config(&self, point: RegisterPoint) -> Result<(), io::Error> {
        self.set_point(point);
        Ok(())
    }

    async fn remove_config(&self, id: &str) -> Result<(), io::Error> {
        self.remove_point(id);
        Ok(())
    }

    async fn init_configs(&self, points: Vec<RegisterPoint>) -> Result<(), io::Error> {
        self.init_points(points);
        Ok(())
    }

    async fn get_values(&self) -> Result<HashMap<String, String>, io::Error> {
        Ok(self
            .all_values()
            .into_iter()
            .map(|(id, raw)| (id, STANDARD.encode(raw)))
            .collect())
    }

    async fn set_value(&self, id: &str, value: &str) -> Result<(), io::Error> {
        let raw = STANDARD
            .decode(value)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        self.set_raw(id, &raw);
        Ok(())
    }
}

/// Serve the same register bank over a serial line, RTU framing.
#[cfg(feature = "serial")]
pub fn spawn_rtu_server(
    sim: &SimServer,
    path: &str,
    baud_rate: u32,
) -> Result<JoinHandle<()>, io::Error> {
    let builder = tokio_serial::new(path, baud_rate);
    let serial_stream = tokio_serial::SerialStream::open(&builder)
        .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
    let rtu = server::rtu::Server::new(serial_stream);
    let service = sim.clone();

    Ok(tokio::spawn(async move {
        if let Err(err) = rtu.serve_forever(service).await {
            error!("{err}");
        }
    }))
}
