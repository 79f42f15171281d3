use serde_json::Value;

use crate::error::{Result, StratumError};
use crate::protocol::types::{Method, Request};

/// A request decoded into the fields the session acts on.
#[derive(Debug, Clone, PartialEq)]
pub enum StratumMessage {
    Subscribe {
        id: Option<Value>,
        user_agent: Option<String>,
    },
    Authorize {
        id: Option<Value>,
        username: String,
        password: Option<String>,
    },
    Submit {
        id: Option<Value>,
        worker: String,
        job_id: u64,
        extranonce2: String,
        ntime: u32,
        nonce: u32,
    },
}

#[derive(Debug, Default, Clone)]
pub struct Parser;

impl Parser {
    pub fn new() -> Self {
        Self
    }

    /// Parse one line. `Ok(None)` means a well-formed request the session
    /// ignores (unknown or server-to-client methods).
    pub fn parse(&self, line: &str) -> Result<Option<StratumMessage>> {
        let request: Request =
            serde_json::from_str(line).map_err(|e| StratumError::InvalidMessageFormat {
                message: e.to_string(),
                raw_data: Some(line.chars().take(120).collect()),
            })?;

        match request.method {
            Method::Subscribe => self.subscribe(request).map(Some),
            Method::Authorize => self.authorize(request).map(Some),
            Method::Submit => self.submit(request).map(Some),
            Method::ExtranonceSubscribe | Method::Unknown => Ok(None),
        }
    }

    fn subscribe(&self, request: Request) -> Result<StratumMessage> {
        let user_agent = request
            .params
            .as_ref()
            .and_then(|params| params.as_array())
            .and_then(|params| params.first())
            .and_then(|param| param.as_str())
            .map(|s| s.to_string());

        Ok(StratumMessage::Subscribe {
            id: request.id,
            user_agent,
        })
    }

    fn authorize(&self, request: Request) -> Result<StratumMessage> {
        let params = request
            .params
            .as_ref()
            .and_then(|params| params.as_array())
            .ok_or_else(|| self.bad_params("mining.authorize"))?;

        let username = params
            .first()
            .and_then(|param| param.as_str())
            .ok_or_else(|| self.bad_params("mining.authorize"))?
            .trim()
            .to_string();
        let password = params
            .get(1)
            .and_then(|param| param.as_str())
            .map(|s| s.to_string());

        Ok(StratumMessage::Authorize {
            id: request.id,
            username,
            password,
        })
    }

    fn submit(&self, request: Request) -> Result<StratumMessage> {
        let params = request
            .params
            .as_ref()
            .and_then(|params| params.as_array())
            .ok_or_else(|| self.bad_params("mining.submit"))?;

        let text = |i: usize| -> Result<&str> {
            params
                .get(i)
                .and_then(|param| param.as_str())
                .ok_or_else(|| self.bad_params("mining.submit"))
        };

        let worker = text(0)?.to_string();
        let job_id = u64::from_str_radix(text(1)?, 16)
            .map_err(|_| self.bad_params("mining.submit"))?;
        let extranonce2 = text(2)?.to_string();
        let ntime = u32::from_str_radix(text(3)?, 16)
            .map_err(|_| self.bad_params("mining.submit"))?;
        let nonce = u32::from_str_radix(text(4)?, 16)
            .map_err(|_| self.bad_params("mining.submit"))?;

        Ok(StratumMessage::Submit {
            id: request.id,
            worker,
            job_id,
            extranonce2,
            ntime,
            nonce,
        })
    }

    fn bad_params(&self, method: &str) -> StratumError {
        StratumError::Protocol {
            message: format!("invalid {method} parameters"),
            method: Some(method.to_string()),
            request_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_subscribe_with_agent() {
        let parser = Parser::new();
        let message = parser
            .parse(r#"{"id":1,"method":"mining.subscribe","params":["cgminer/4.10"]}"#)
            .unwrap()
            .unwrap();
        assert_eq!(
            message,
            StratumMessage::Subscribe {
                id: Some(serde_json::json!(1)),
                user_agent: Some("cgminer/4.10".to_string()),
            }
        );
    }

    #[test]
    fn parses_authorize() {
        let parser = Parser::new();
        let message = parser
            .parse(r#"{"id":2,"method":"mining.authorize","params":["alice.rig0","x"]}"#)
            .unwrap()
            .unwrap();
        match message {
            StratumMessage::Authorize {
                username, password, ..
            } => {
                assert_eq!(username, "alice.rig0");
                assert_eq!(password.as_deref(), Some("x"));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn parses_submit_hex_fields() {
        let parser = Parser::new();
        let message = parser
            .parse(
                r#"{"id":4,"method":"mining.submit","params":["alice.rig0","1a2b","00000001","5f5e1000","deadbeef"]}"#,
            )
            .unwrap()
            .unwrap();
        match message {
            StratumMessage::Submit {
                worker,
                job_id,
                extranonce2,
                ntime,
                nonce,
                ..
            } => {
                assert_eq!(worker, "alice.rig0");
                assert_eq!(job_id, 0x1a2b);
                assert_eq!(extranonce2, "00000001");
                assert_eq!(ntime, 0x5f5e1000);
                assert_eq!(nonce, 0xdeadbeef);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn rejects_submit_with_bad_hex() {
        let parser = Parser::new();
        assert!(parser
            .parse(
                r#"{"id":4,"method":"mining.submit","params":["w","zz","00000001","5f5e1000","00"]}"#,
            )
            .is_err());
    }

    #[test]
    fn ignores_unknown_methods() {
        let parser = Parser::new();
        assert_eq!(
            parser
                .parse(r#"{"id":9,"method":"mining.get_transactions","params":[]}"#)
                .unwrap(),
            None
        );
    }

    #[test]
    fn rejects_non_json_lines() {
        let parser = Parser::new();
        assert!(parser.parse("garbage").is_err());
    }
}
