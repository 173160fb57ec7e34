//! Line-oriented request/response codec
//!
//! One request per line: `<MessageType> [args...]`. Replies are
//! `OK [payload]` or `ERR <code> <CODE_NAME> <message>`.

use bytes::Bytes;
use connstate::{ConnectionStateError, Credentials, OperationDescriptor, StateResult};

/// Decoded client request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Handshake,
    Authenticate(Credentials),
    GetServer,
    GetRegionNames,
    Get { region: String, key: String },
    Put { region: String, key: String, value: Bytes },
    Remove { region: String, key: String },
    GetSize { region: String },
    KeySet { region: String },
    Clear { region: String },
}

impl Request {
    /// Decode one request line
    ///
    /// Unknown message types and wrong argument counts are rejected with
    /// `UNKNOWN_OPERATION` before the state machine sees the request.
    pub fn parse(line: &str) -> StateResult<Self> {
        let line = line.trim();
        let (message_type, rest) = match line.split_once(char::is_whitespace) {
            Some((head, tail)) => (head, tail.trim_start()),
            None => (line, ""),
        };
        let args: Vec<&str> = rest.split_whitespace().collect();

        let arity = |n: usize| -> StateResult<()> {
            if args.len() == n {
                Ok(())
            } else {
                Err(ConnectionStateError::unknown_operation(&format!(
                    "{} expects {} argument(s), got {}",
                    message_type,
                    n,
                    args.len()
                )))
            }
        };

        let request = match message_type {
            "HandshakeRequest" => {
                arity(0)?;
                Request::Handshake
            }
            "AuthenticationRequest" => {
                arity(2)?;
                Request::Authenticate(Credentials::new(args[0], args[1]))
            }
            "GetServerRequest" => {
                arity(0)?;
                Request::GetServer
            }
            "GetRegionNamesRequest" => {
                arity(0)?;
                Request::GetRegionNames
            }
            "GetRequest" => {
                arity(2)?;
                Request::Get {
                    region: args[0].to_string(),
                    key: args[1].to_string(),
                }
            }
            "PutRequest" => {
                // value is the remainder of the line and may contain spaces
                let mut parts = rest.splitn(3, char::is_whitespace);
                match (parts.next(), parts.next(), parts.next()) {
                    (Some(region), Some(key), Some(value))
                        if !region.is_empty() && !key.is_empty() =>
                    {
                        Request::Put {
                            region: region.to_string(),
                            key: key.to_string(),
                            value: Bytes::copy_from_slice(value.trim_start().as_bytes()),
                        }
                    }
                    _ => {
                        return Err(ConnectionStateError::unknown_operation(
                            "PutRequest expects <region> <key> <value>",
                        ))
                    }
                }
            }
            "RemoveRequest" => {
                arity(2)?;
                Request::Remove {
                    region: args[0].to_string(),
                    key: args[1].to_string(),
                }
            }
            "GetSizeRequest" => {
                arity(1)?;
                Request::GetSize {
                    region: args[0].to_string(),
                }
            }
            "KeySetRequest" => {
                arity(1)?;
                Request::KeySet {
                    region: args[0].to_string(),
                }
            }
            "ClearRequest" => {
                arity(1)?;
                Request::Clear {
                    region: args[0].to_string(),
                }
            }
            "" => return Err(ConnectionStateError::unknown_operation("empty request")),
            other => {
                return Err(ConnectionStateError::unknown_operation(&format!(
                    "unrecognized message type '{}'",
                    other
                )))
            }
        };
        Ok(request)
    }

    pub fn message_type(&self) -> &'static str {
        match self {
            Request::Handshake => "HandshakeRequest",
            Request::Authenticate(_) => "AuthenticationRequest",
            Request::GetServer => "GetServerRequest",
            Request::GetRegionNames => "GetRegionNamesRequest",
            Request::Get { .. } => "GetRequest",
            Request::Put { .. } => "PutRequest",
            Request::Remove { .. } => "RemoveRequest",
            Request::GetSize { .. } => "GetSizeRequest",
            Request::KeySet { .. } => "KeySetRequest",
            Request::Clear { .. } => "ClearRequest",
        }
    }

    /// Operation descriptor handed to the state machine
    pub fn descriptor(&self) -> StateResult<OperationDescriptor> {
        let (region, key) = match self {
            Request::Get { region, key }
            | Request::Put { region, key, .. }
            | Request::Remove { region, key } => (Some(region.as_str()), Some(key.as_str())),
            Request::GetSize { region } | Request::KeySet { region } | Request::Clear { region } => {
                (Some(region.as_str()), None)
            }
            Request::Handshake
            | Request::Authenticate(_)
            | Request::GetServer
            | Request::GetRegionNames => (None, None),
        };
        OperationDescriptor::from_message_type(self.message_type(), region, key)
    }
}

/// Reply sent back for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Ok(Option<String>),
    Error(ConnectionStateError),
}

impl Response {
    pub fn ok() -> Self {
        Response::Ok(None)
    }

    pub fn ok_with(payload: impl Into<String>) -> Self {
        Response::Ok(Some(payload.into()))
    }

    /// Encode as a single line including the trailing newline
    pub fn encode(&self) -> String {
        match self {
            Response::Ok(None) => "OK\n".to_string(),
            Response::Ok(Some(payload)) => format!("OK {}\n", payload.replace('\n', " ")),
            Response::Error(e) => format!(
                "ERR {} {} {}\n",
                e.code().as_u32(),
                e.code(),
                e.message().replace('\n', " ")
            ),
        }
    }

    pub fn is_authentication_failure(&self) -> bool {
        matches!(self, Response::Error(e) if e.is_authentication_failure())
    }
}

impl From<ConnectionStateError> for Response {
    fn from(e: ConnectionStateError) -> Self {
        Response::Error(e)
    }
}
