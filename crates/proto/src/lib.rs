//! SumLoop wire protocol
//!
//! Every exchange is a single newline-terminated UTF-8 line in each direction:
//! one request line, one response line, then the connection is closed.
//! This crate only knows how to parse and render those lines; it does no I/O.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Upper bound on the length of a single protocol line, terminator included
pub const MAX_LINE_BYTES: usize = 64 * 1024;

const SUM_TAG: &str = "SUM";
const HEARTBEAT_TAG: &str = "HEARTBEAT";
const STATUS_TAG: &str = "STATUS";
const RESULT_TAG: &str = "RESULT";
const ERROR_TAG: &str = "ERROR";
const ACK_TAG: &str = "ACK";
const SERVER_PREFIX: &str = "SERVER_";

/// Errors raised while parsing protocol lines
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Unknown opcode or missing separator
    #[error("Invalid request format")]
    InvalidFormat,

    /// Heartbeat with the wrong field count or a non-numeric field
    #[error("Malformed heartbeat: {0}")]
    MalformedHeartbeat(String),

    /// Operand that is not a 64-bit integer
    #[error("Invalid number '{0}'")]
    InvalidOperand(String),

    /// Sum that does not fit in 64 bits
    #[error("Sum overflows a 64-bit integer")]
    Overflow,

    /// Response line that matches no known status tag
    #[error("Unrecognized response: {0}")]
    UnrecognizedResponse(String),

    /// STATUS payload that is not the expected JSON document
    #[error("Invalid status payload: {0}")]
    InvalidStatus(String),

    /// Line longer than [`MAX_LINE_BYTES`]
    #[error("Line exceeds {0} bytes")]
    LineTooLong(usize),
}

/// Strip the line terminator (`\n` or `\r\n`) from a raw line
pub fn trim_line(line: &str) -> &str {
    line.trim_end_matches(['\r', '\n'])
}

/// Status push from a worker: `HEARTBEAT:<id>:<port>:<load>:<total>`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub worker_id: u32,
    pub port: u16,
    pub current_load: u32,
    pub total_requests: u64,
}

impl Heartbeat {
    /// Parse the colon-separated fields that follow the `HEARTBEAT:` tag
    pub fn parse_fields(fields: &str) -> Result<Self, ProtocolError> {
        let parts: Vec<&str> = fields.split(':').collect();
        if parts.len() != 4 {
            return Err(ProtocolError::MalformedHeartbeat(format!(
                "expected 4 fields, got {}",
                parts.len()
            )));
        }

        Ok(Self {
            worker_id: parse_field(parts[0], "worker id")?,
            port: parse_field(parts[1], "port")?,
            current_load: parse_field(parts[2], "current load")?,
            total_requests: parse_field(parts[3], "total requests")?,
        })
    }
}

fn parse_field<T: std::str::FromStr>(raw: &str, name: &str) -> Result<T, ProtocolError> {
    raw.parse()
        .map_err(|_| ProtocolError::MalformedHeartbeat(format!("invalid {} '{}'", name, raw)))
}

impl fmt::Display for Heartbeat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}:{}",
            HEARTBEAT_TAG, self.worker_id, self.port, self.current_load, self.total_requests
        )
    }
}

/// A `SUM` request
///
/// The body is kept exactly as received so a dispatcher can forward the
/// request untouched; operands are only parsed by whoever evaluates it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SumRequest {
    body: String,
}

impl SumRequest {
    /// Build a request from operands
    pub fn new(operands: &[i64]) -> Self {
        let body = operands
            .iter()
            .map(|n| n.to_string())
            .collect::<Vec<_>>()
            .join(",");
        Self { body }
    }

    /// Raw comma-separated body
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Parse the operands, tolerating whitespace around each token
    pub fn operands(&self) -> Result<Vec<i64>, ProtocolError> {
        self.body
            .split(',')
            .map(|token| {
                let token = token.trim();
                token
                    .parse::<i64>()
                    .map_err(|_| ProtocolError::InvalidOperand(token.to_string()))
            })
            .collect()
    }

    /// Sum the operands with overflow checking
    pub fn evaluate(&self) -> Result<i64, ProtocolError> {
        self.operands()?
            .into_iter()
            .try_fold(0i64, |acc, n| acc.checked_add(n))
            .ok_or(ProtocolError::Overflow)
    }
}

impl fmt::Display for SumRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", SUM_TAG, self.body)
    }
}

/// Any line a dispatcher or worker may receive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Compute request from a client
    Sum(SumRequest),

    /// Status push from a worker
    Heartbeat(Heartbeat),

    /// Registry listing request
    Status,
}

impl Message {
    /// Parse a request line; the terminator is optional
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line = trim_line(line);
        if line == STATUS_TAG {
            return Ok(Message::Status);
        }

        match line.split_once(':') {
            Some((SUM_TAG, body)) => Ok(Message::Sum(SumRequest {
                body: body.to_string(),
            })),
            Some((HEARTBEAT_TAG, fields)) => Heartbeat::parse_fields(fields).map(Message::Heartbeat),
            _ => Err(ProtocolError::InvalidFormat),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Sum(request) => request.fmt(f),
            Message::Heartbeat(heartbeat) => heartbeat.fmt(f),
            Message::Status => f.write_str(STATUS_TAG),
        }
    }
}

/// Successful evaluation: `RESULT:<sum>:SERVER_<id>:<timestampMillis>`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SumResult {
    pub sum: i64,
    pub worker_id: u32,
    pub timestamp_millis: i64,
}

/// Registry entry as reported by `STATUS`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub worker_id: u32,
    pub address: String,
    pub port: u16,
    pub current_load: u32,
    pub total_requests: u64,
    pub last_heartbeat_age_ms: u64,
}

/// Any line a dispatcher or worker may answer with
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Result(SumResult),
    Error(String),
    Ack,
    Status(Vec<WorkerStatus>),
}

impl Response {
    /// Build an error response, flattening line breaks so it stays one line
    pub fn error(message: impl Into<String>) -> Self {
        let message: String = message.into();
        Response::Error(message.replace(['\r', '\n'], " "))
    }

    /// Parse a response line; the terminator is optional
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line = trim_line(line);
        if line == ACK_TAG {
            return Ok(Response::Ack);
        }

        let unrecognized = || ProtocolError::UnrecognizedResponse(line.to_string());
        let (tag, payload) = line.split_once(':').ok_or_else(unrecognized)?;

        match tag {
            ERROR_TAG => Ok(Response::Error(payload.to_string())),
            RESULT_TAG => {
                let mut parts = payload.split(':');
                let (Some(sum), Some(server), Some(timestamp), None) =
                    (parts.next(), parts.next(), parts.next(), parts.next())
                else {
                    return Err(unrecognized());
                };

                let worker_id = server
                    .strip_prefix(SERVER_PREFIX)
                    .and_then(|id| id.parse().ok())
                    .ok_or_else(unrecognized)?;

                Ok(Response::Result(SumResult {
                    sum: sum.parse().map_err(|_| unrecognized())?,
                    worker_id,
                    timestamp_millis: timestamp.parse().map_err(|_| unrecognized())?,
                }))
            }
            STATUS_TAG => serde_json::from_str(payload)
                .map(Response::Status)
                .map_err(|e| ProtocolError::InvalidStatus(e.to_string())),
            _ => Err(unrecognized()),
        }
    }

    /// Whether this is an `ERROR` line
    pub fn is_error(&self) -> bool {
        matches!(self, Response::Error(_))
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Result(result) => write!(
                f,
                "{}:{}:{}{}:{}",
                RESULT_TAG, result.sum, SERVER_PREFIX, result.worker_id, result.timestamp_millis
            ),
            Response::Error(message) => write!(f, "{}:{}", ERROR_TAG, message),
            Response::Ack => f.write_str(ACK_TAG),
            Response::Status(workers) => match serde_json::to_string(workers) {
                Ok(json) => write!(f, "{}:{}", STATUS_TAG, json),
                Err(e) => write!(f, "{}:{}", ERROR_TAG, e),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sum_tolerates_whitespace() {
        let message = Message::parse("SUM: 1, 2 ,3,4 , 5\r\n").unwrap();
        let Message::Sum(request) = message else {
            panic!("expected a SUM request");
        };

        assert_eq!(request.operands().unwrap(), vec![1, 2, 3, 4, 5]);
        assert_eq!(request.evaluate().unwrap(), 15);
    }

    #[test]
    fn test_sum_keeps_body_verbatim() {
        let line = "SUM: 7,-3 , 10";
        let message = Message::parse(line).unwrap();
        assert_eq!(message.to_string(), line);
    }

    #[test]
    fn test_sum_negative_operands() {
        let request = SumRequest::new(&[-5, 2, -7]);
        assert_eq!(request.to_string(), "SUM:-5,2,-7");
        assert_eq!(request.evaluate().unwrap(), -10);
    }

    #[test]
    fn test_sum_rejects_bad_tokens() {
        let Message::Sum(request) = Message::parse("SUM:1,abc,3").unwrap() else {
            panic!("expected a SUM request");
        };
        assert_eq!(
            request.evaluate(),
            Err(ProtocolError::InvalidOperand("abc".to_string()))
        );

        let Message::Sum(empty) = Message::parse("SUM:").unwrap() else {
            panic!("expected a SUM request");
        };
        assert!(matches!(empty.evaluate(), Err(ProtocolError::InvalidOperand(_))));
    }

    #[test]
    fn test_sum_overflow() {
        let request = SumRequest::new(&[i64::MAX, 1]);
        assert_eq!(request.evaluate(), Err(ProtocolError::Overflow));
    }

    #[test]
    fn test_parse_heartbeat() {
        let message = Message::parse("HEARTBEAT:3:9003:2:41").unwrap();
        assert_eq!(
            message,
            Message::Heartbeat(Heartbeat {
                worker_id: 3,
                port: 9003,
                current_load: 2,
                total_requests: 41,
            })
        );
        assert_eq!(message.to_string(), "HEARTBEAT:3:9003:2:41");
    }

    #[test]
    fn test_heartbeat_field_errors() {
        assert!(matches!(
            Message::parse("HEARTBEAT:3:9003:2"),
            Err(ProtocolError::MalformedHeartbeat(_))
        ));
        assert!(matches!(
            Message::parse("HEARTBEAT:3:9003:2:41:7"),
            Err(ProtocolError::MalformedHeartbeat(_))
        ));
        assert!(matches!(
            Message::parse("HEARTBEAT:3:9003:-1:41"),
            Err(ProtocolError::MalformedHeartbeat(_))
        ));
    }

    #[test]
    fn test_unknown_opcode() {
        assert_eq!(Message::parse("FOO:bar"), Err(ProtocolError::InvalidFormat));
        assert_eq!(Message::parse("sum:1,2"), Err(ProtocolError::InvalidFormat));
        assert_eq!(Message::parse(""), Err(ProtocolError::InvalidFormat));
        assert_eq!(
            ProtocolError::InvalidFormat.to_string(),
            "Invalid request format"
        );
    }

    #[test]
    fn test_parse_result_response() {
        let response = Response::parse("RESULT:15:SERVER_2:1700000000123\n").unwrap();
        assert_eq!(
            response,
            Response::Result(SumResult {
                sum: 15,
                worker_id: 2,
                timestamp_millis: 1_700_000_000_123,
            })
        );
        assert_eq!(response.to_string(), "RESULT:15:SERVER_2:1700000000123");
    }

    #[test]
    fn test_error_response_stays_on_one_line() {
        let response = Response::error("connection refused\nsecond line");
        assert_eq!(response.to_string(), "ERROR:connection refused second line");
        assert!(response.is_error());

        // Error payloads may contain colons
        assert_eq!(
            Response::parse("ERROR:Failed to forward request - os error: 111").unwrap(),
            Response::Error("Failed to forward request - os error: 111".to_string())
        );
    }

    #[test]
    fn test_status_response() {
        let response = Response::Status(vec![WorkerStatus {
            worker_id: 1,
            address: "127.0.0.1".to_string(),
            port: 9001,
            current_load: 0,
            total_requests: 12,
            last_heartbeat_age_ms: 800,
        }]);

        let line = response.to_string();
        assert!(line.starts_with("STATUS:["));
        assert_eq!(Response::parse(&line).unwrap(), response);
    }

    #[test]
    fn test_unrecognized_response() {
        assert!(matches!(
            Response::parse("RESULT:15:WORKER_2:1"),
            Err(ProtocolError::UnrecognizedResponse(_))
        ));
        assert!(matches!(
            Response::parse("hello"),
            Err(ProtocolError::UnrecognizedResponse(_))
        ));
    }
}
