use crate::error::{Error, Result};
use crate::{supervisor, tasks};
use log::error;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::io::{self, Read, Write};
use std::os::unix;
use std::path::PathBuf;

const JSON_RPC: &str = "2.0";
const MAX_API_CONN: usize = 10;

const ERR_METHOD_NOT_FOUND: i32 = -32601;
const ERR_INVALID_PARAMS: i32 = -32602;
const ERR_UNSUPPORTED: i32 = -32600;

#[derive(Serialize, Deserialize)]
pub struct Request {
    jsonrpc: String,
    method: String,
    params: Option<Value>,
}

impl Request {
    pub fn new(method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSON_RPC.to_owned(),
            method: method.to_owned(),
            params,
        }
    }
    fn check(&self) -> Result<()> {
        if self.jsonrpc == JSON_RPC {
            Ok(())
        } else {
            Err(Error::api("unsupported json rpc version"))
        }
    }
}

#[derive(Serialize, Deserialize)]
pub struct Response {
    jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ResponseError>,
}

impl Response {
    #[inline]
    fn err(code: i32, e: Error) -> Self {
        Self {
            jsonrpc: JSON_RPC.to_owned(),
            result: None,
            error: Some(ResponseError {
                code,
                message: Some(e.to_string()),
            }),
        }
    }
    #[inline]
    fn result(val: Value) -> Self {
        Self {
            jsonrpc: JSON_RPC.to_owned(),
            result: Some(val),
            error: None,
        }
    }
    pub fn check(&self) -> Result<()> {
        if self.jsonrpc != JSON_RPC {
            return Err(Error::api("unsupported json rpc version"));
        }
        if let Some(ref err) = self.error {
            return Err(Error::api(format!(
                "{} ({})",
                err.message.as_deref().unwrap_or("api call failed"),
                err.code
            )));
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct ResponseError {
    code: i32,
    message: Option<String>,
}

pub(crate) fn spawn_api() -> PathBuf {
    let mut socket_path = crate::var_dir();
    socket_path.push(format!("{}.sock", crate::name()));
    let _ = fs::remove_file(&socket_path);
    let listener = unix::net::UnixListener::bind(&socket_path).unwrap();
    let _ = tasks::spawn_service("api", move || {
        let pool = threadpool::ThreadPool::new(MAX_API_CONN);
        for sr in listener.incoming() {
            match sr {
                Ok(stream) => {
                    pool.execute(move || {
                        if let Err(e) = handle_api_stream(stream) {
                            error!("API {}", e);
                        }
                    });
                }
                Err(e) => error!("API {}", e),
            }
        }
    });
    socket_path
}

fn handle_api_stream(mut stream: unix::net::UnixStream) -> Result<()> {
    stream.set_read_timeout(Some(crate::DEFAULT_TIMEOUT))?;
    stream.set_write_timeout(Some(crate::DEFAULT_TIMEOUT))?;
    loop {
        let mut buf: [u8; 5] = [0; 5];
        match stream.read_exact(&mut buf) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(e) => {
                return Err(e.into());
            }
        }
        if buf[0] != 0 {
            return Err(Error::api("invalid header"));
        }
        let len = u32::from_le_bytes([buf[1], buf[2], buf[3], buf[4]]);
        let mut buf = vec![0; len as usize];
        stream.read_exact(&mut buf)?;
        let req: Request = serde_json::from_slice(&buf)?;
        req.check()?;
        let response = handle_api_call(&req.method, req.params);
        let packed = serde_json::to_vec(&response)?;
        let mut buf = Vec::with_capacity(packed.len() + 5);
        buf.push(0u8);
        let len = u32::try_from(packed.len()).map_err(|_| Error::api("response too large"))?;
        buf.extend(len.to_le_bytes());
        buf.extend(packed);
        stream.write_all(&buf)?;
    }
    Ok(())
}

fn handle_api_call(method: &str, params: Option<Value>) -> Response {
    macro_rules! ok {
        () => {
            Response::result(Value::Null)
        };
    }
    macro_rules! invalid_params {
        () => {
            Response::err(ERR_INVALID_PARAMS, Error::api("invalid method parameters"))
        };
    }
    match method {
        "test" => {
            if params.is_none() {
                ok!()
            } else {
                invalid_params!()
            }
        }
        "info" => {
            if params.is_none() {
                match serde_json::to_value(crate::daemon_info()) {
                    Ok(val) => Response::result(val),
                    Err(e) => Response::err(ERR_UNSUPPORTED, e.into()),
                }
            } else {
                invalid_params!()
            }
        }
        "processes.get" => {
            if params.is_none() {
                match serde_json::to_value(supervisor::process_statuses()) {
                    Ok(val) => Response::result(val),
                    Err(e) => Response::err(ERR_UNSUPPORTED, e.into()),
                }
            } else {
                invalid_params!()
            }
        }
        "thread_stats.get" => {
            if params.is_none() {
                match serde_json::to_value(tasks::thread_info()) {
                    Ok(val) => Response::result(val),
                    Err(e) => Response::err(ERR_UNSUPPORTED, e.into()),
                }
            } else {
                invalid_params!()
            }
        }
        "thread_stats.reset" => {
            if params.is_none() {
                tasks::reset_thread_stats();
                ok!()
            } else {
                invalid_params!()
            }
        }
        v => Response::err(ERR_METHOD_NOT_FOUND, Error::api(format!("not implemented: {}", v))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_version_check() {
        let req = Request::new("test", None);
        assert!(req.check().is_ok());
        let req: Request = serde_json::from_str(r#"{"jsonrpc":"1.0","method":"test","params":null}"#).unwrap();
        assert!(req.check().is_err());
    }

    #[test]
    fn unknown_method_returns_error() {
        let response = handle_api_call("no.such.method", None);
        assert!(response.check().is_err());
        assert!(response.result.is_none());
    }

    #[test]
    fn test_method_rejects_params() {
        let response = handle_api_call("test", Some(Value::Bool(true)));
        assert!(response.check().is_err());
        let response = handle_api_call("test", None);
        assert!(response.check().is_ok());
    }

    #[test]
    fn processes_get_serializes() {
        let response = handle_api_call("processes.get", None);
        assert!(response.check().is_ok());
        assert!(response.result.unwrap().is_object());
    }
}
