//! In-process fake gateway speaking the wire protocol, for integration tests.
#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use kldfs_gateway::protocol::codec::{self, REQUEST_HEADER_SIZE};
use kldfs_gateway::protocol::errno;
use kldfs_gateway::{Opcode, Stat};

/// Misbehaviour injected into the next response.
#[derive(Clone, Copy, Debug)]
pub enum Fault {
    /// Declare one payload byte fewer than is sent
    CorruptSize,
    /// Answer with a different opcode
    WrongOpcode,
    /// Close the connection without answering
    Hangup,
    /// Answer correctly, but only after the given pause
    Delay(Duration),
}

#[derive(Default)]
pub struct FakeState {
    pub files: BTreeMap<String, Vec<u8>>,
    pub dirs: BTreeSet<String>,
    pub xattrs: HashMap<String, BTreeMap<String, Vec<u8>>>,
    pub handles: HashMap<u64, String>,
    pub next_handle: u64,
    pub requests: Vec<Opcode>,
    pub fault: Option<Fault>,
}

impl FakeState {
    fn exists(&self, path: &str) -> bool {
        self.files.contains_key(path) || self.dirs.contains(path)
    }

    fn children(&self, dir: &str) -> Vec<String> {
        let prefix = if dir.ends_with('/') {
            dir.to_string()
        } else {
            format!("{}/", dir)
        };
        self.files
            .keys()
            .chain(self.dirs.iter())
            .filter_map(|p| p.strip_prefix(&prefix))
            .filter(|rest| !rest.is_empty() && !rest.contains('/'))
            .map(str::to_string)
            .collect()
    }
}

pub struct FakeGateway {
    pub addr: String,
    pub state: Arc<Mutex<FakeState>>,
    task: JoinHandle<()>,
}

impl FakeGateway {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let mut initial = FakeState::default();
        initial.dirs.insert("/".to_string());
        let state = Arc::new(Mutex::new(initial));

        let server_state = Arc::clone(&state);
        let task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let state = Arc::clone(&server_state);
                tokio::spawn(serve_connection(stream, state));
            }
        });

        FakeGateway { addr, state, task }
    }

    pub fn add_file(&self, path: &str, data: &[u8]) {
        self.state
            .lock()
            .unwrap()
            .files
            .insert(path.to_string(), data.to_vec());
    }

    pub fn set_xattr(&self, path: &str, name: &str, value: &[u8]) {
        self.state
            .lock()
            .unwrap()
            .xattrs
            .entry(path.to_string())
            .or_default()
            .insert(name.to_string(), value.to_vec());
    }

    pub fn inject(&self, fault: Fault) {
        self.state.lock().unwrap().fault = Some(fault);
    }

    pub fn request_count(&self, op: Opcode) -> usize {
        self.state
            .lock()
            .unwrap()
            .requests
            .iter()
            .filter(|&&r| r == op)
            .count()
    }
}

impl Drop for FakeGateway {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Address nothing is listening on.
pub async fn unreachable_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);
    addr
}

async fn serve_connection(mut stream: TcpStream, state: Arc<Mutex<FakeState>>) {
    loop {
        let mut header = [0u8; REQUEST_HEADER_SIZE];
        if stream.read_exact(&mut header).await.is_err() {
            return;
        }
        let payload_size = i32::from_be_bytes(header[4..8].try_into().unwrap()) as usize;
        let mut frame = header.to_vec();
        frame.resize(REQUEST_HEADER_SIZE + payload_size, 0);
        if stream
            .read_exact(&mut frame[REQUEST_HEADER_SIZE..])
            .await
            .is_err()
        {
            return;
        }
        let (op, fields) = codec::decode_request(&frame).unwrap();

        let (code, reply, fault) = {
            let mut state = state.lock().unwrap();
            state.requests.push(op);
            let (code, reply) = handle(&mut state, op, &fields);
            (code, reply, state.fault.take())
        };

        let mut response = codec::encode_response(op, code, &reply).unwrap();
        match fault {
            Some(Fault::Hangup) => return,
            Some(Fault::Delay(pause)) => tokio::time::sleep(pause).await,
            Some(Fault::CorruptSize) => {
                let declared = i32::from_be_bytes(response[8..12].try_into().unwrap()) - 1;
                response[8..12].copy_from_slice(&declared.to_be_bytes());
            }
            Some(Fault::WrongOpcode) => {
                let other = (op.code() + 1) % 15;
                response[0..4].copy_from_slice(&other.to_be_bytes());
            }
            None => {}
        }
        if stream.write_all(&response).await.is_err() {
            return;
        }
    }
}

fn text(field: &[u8]) -> String {
    String::from_utf8(field.to_vec()).unwrap()
}

fn check_handle(state: &FakeState, path: &str, field: &[u8]) -> bool {
    let id = codec::handle_from_field(field).unwrap();
    state.handles.get(&id).map_or(false, |p| p == path)
}

fn handle(state: &mut FakeState, op: Opcode, fields: &[Vec<u8>]) -> (i32, Vec<Vec<u8>>) {
    let path = text(&fields[0]);
    let ok = (0, Vec::new());
    let err = |code: i32| (-code, Vec::new());

    match op {
        Opcode::GetStat => {
            let (mode, size) = if let Some(data) = state.files.get(&path) {
                (0o100644, data.len() as i64)
            } else if state.dirs.contains(&path) {
                (0o040755, 4096)
            } else {
                return err(errno::ENOENT);
            };
            let stat = Stat {
                dev: 1,
                ino: 42,
                mode,
                nlink: 1,
                uid: 1000,
                gid: 1000,
                size,
                atime: 1_700_000_000,
                mtime: 1_700_000_000,
                ctime: 1_700_000_000,
                blksize: 4096,
                blocks: (size + 511) / 512,
            };
            (0, vec![stat.encode()])
        }
        Opcode::Delete => match state.files.remove(&path) {
            Some(_) => ok,
            None => err(errno::ENOENT),
        },
        Opcode::RemoveDirectory => {
            if !state.dirs.contains(&path) {
                err(errno::ENOENT)
            } else if !state.children(&path).is_empty() {
                err(errno::ENOTEMPTY)
            } else {
                state.dirs.remove(&path);
                ok
            }
        }
        Opcode::Rename => {
            let to = text(&fields[1]);
            match state.files.remove(&path) {
                Some(data) => {
                    state.files.insert(to, data);
                    ok
                }
                None => err(errno::ENOENT),
            }
        }
        Opcode::Mkdir => {
            if state.exists(&path) {
                err(errno::EEXIST)
            } else {
                state.dirs.insert(path);
                ok
            }
        }
        Opcode::ReadDirectoryEntries => {
            if !state.dirs.contains(&path) {
                return err(errno::ENOTDIR);
            }
            let mut names = vec![b".".to_vec(), b"..".to_vec()];
            names.extend(state.children(&path).into_iter().map(String::into_bytes));
            (0, names)
        }
        Opcode::GetFileHandle | Opcode::CreateNewFile => {
            if op == Opcode::CreateNewFile {
                if state.exists(&path) {
                    return err(errno::EEXIST);
                }
                state.files.insert(path.clone(), Vec::new());
            } else if !state.files.contains_key(&path) {
                return err(errno::ENOENT);
            }
            state.next_handle += 1;
            let id = state.next_handle;
            state.handles.insert(id, path);
            (0, vec![codec::handle_field(id).to_vec()])
        }
        Opcode::ReadFileData => {
            if !check_handle(state, &path, &fields[1]) {
                return err(errno::EBADF);
            }
            let offset = codec::offset_from_field(&fields[2]).unwrap() as usize;
            let length = codec::length_from_field(&fields[3]).unwrap() as usize;
            let data = &state.files[&path];
            let start = offset.min(data.len());
            let end = (offset + length).min(data.len());
            (0, vec![data[start..end].to_vec()])
        }
        Opcode::WriteFileData => {
            if !check_handle(state, &path, &fields[1]) {
                return err(errno::EBADF);
            }
            let offset = codec::offset_from_field(&fields[2]).unwrap() as usize;
            let data = &fields[3];
            let file = state.files.get_mut(&path).unwrap();
            if file.len() < offset + data.len() {
                file.resize(offset + data.len(), 0);
            }
            file[offset..offset + data.len()].copy_from_slice(data);
            (data.len() as i32, Vec::new())
        }
        Opcode::Flush => {
            if check_handle(state, &path, &fields[1]) {
                ok
            } else {
                err(errno::EBADF)
            }
        }
        Opcode::CloseFileHandle => {
            let id = codec::handle_from_field(&fields[1]).unwrap();
            match state.handles.remove(&id) {
                Some(_) => ok,
                None => err(errno::EBADF),
            }
        }
        Opcode::TruncateFile => {
            let length = codec::offset_from_field(&fields[1]).unwrap() as usize;
            match state.files.get_mut(&path) {
                Some(file) => {
                    file.resize(length, 0);
                    ok
                }
                None => err(errno::ENOENT),
            }
        }
        Opcode::ListExtendedAttr => {
            if !state.exists(&path) {
                return err(errno::ENOENT);
            }
            let names = state
                .xattrs
                .get(&path)
                .map(|attrs| attrs.keys().map(|k| k.clone().into_bytes()).collect())
                .unwrap_or_default();
            (0, names)
        }
        Opcode::GetExtendedAttr => {
            let name = text(&fields[1]);
            match state.xattrs.get(&path).and_then(|attrs| attrs.get(&name)) {
                Some(value) => (0, vec![value.clone()]),
                None => err(errno::ENODATA),
            }
        }
    }
}
