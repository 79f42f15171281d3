use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::protocol::parser::{Parser, StratumMessage};
use crate::protocol::types::Response;
use crate::server::{Connection, Server, Session, SessionFactory, Submission, Submitter};
use crate::utils::hash;

const ERR_BAD_MESSAGE: u32 = 20;
const ERR_UNAUTHORIZED: u32 = 24;
const ERR_NOT_SUBSCRIBED: u32 = 25;

/// The Stratum V1 line-protocol state machine for one connection.
///
/// Deliberately lean: subscribe, authorize, submit, with the difficulty
/// fixed by configuration. Vardiff and banning belong to a richer session
/// layer; the server only relies on the [`Session`] contract.
pub struct StratumSession {
    conn: Arc<Connection>,
    server: Arc<Server>,
    parser: Parser,
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    subscribed: bool,
    agent: String,
    authorized: Option<Submitter>,
}

impl StratumSession {
    pub fn new(conn: Arc<Connection>, server: Arc<Server>) -> Self {
        Self {
            conn,
            server,
            parser: Parser::new(),
            state: Mutex::new(State::default()),
        }
    }

    fn respond(&self, response: Response) {
        if !self.conn.send(response.to_line()) {
            self.conn.close();
        }
    }

    fn handle_subscribe(&self, id: Option<Value>, user_agent: Option<String>) {
        let extranonce1 = self.conn.session_id().extranonce1_hex();
        {
            let mut state = self.state.lock().unwrap();
            state.subscribed = true;
            state.agent = user_agent.unwrap_or_default();
        }

        let extranonce1 = extranonce1.as_str();
        let result = serde_json::json!([
            [
                ["mining.set_difficulty", extranonce1],
                ["mining.notify", extranonce1]
            ],
            extranonce1,
            crate::job::EXTRANONCE2_SIZE,
        ]);
        self.respond(Response::ok(id, result));
    }

    fn handle_authorize(&self, id: Option<Value>, username: &str, _password: Option<String>) {
        if !self.state.lock().unwrap().subscribed {
            self.respond(Response::err(id, ERR_NOT_SUBSCRIBED, "not subscribed"));
            return;
        }

        let full_name = username.trim().to_lowercase();
        let (user, worker) = match full_name.split_once('.') {
            Some((user, worker)) if !worker.is_empty() => (user, worker),
            _ => (full_name.as_str(), "default"),
        };

        let user_id = match self.server.registry().get_user_id(user) {
            Some(user_id) => user_id,
            None => {
                tracing::info!("authorization refused for unknown user {}", user);
                self.respond(Response::err(id, ERR_UNAUTHORIZED, "unknown user"));
                return;
            }
        };

        let worker_id = hash::worker_id(&full_name);
        let difficulty = self.server.config().server.difficulty;
        let agent = self.state.lock().unwrap().agent.clone();
        self.server
            .registry()
            .add_worker(user_id, worker_id, worker, &agent);

        {
            let mut state = self.state.lock().unwrap();
            state.authorized = Some(Submitter {
                user_id,
                worker_id,
                full_name: full_name.clone(),
                difficulty,
                target: hash::target_from_difficulty(difficulty),
            });
        }

        tracing::info!(
            "{} authorized as {} (user {})",
            self.conn.session_id(),
            full_name,
            user_id
        );
        self.respond(Response::ok(id, serde_json::json!(true)));
        self.server.greet_authorized(&self.conn, difficulty);
    }

    fn handle_submit(
        &self,
        id: Option<Value>,
        job_id: u64,
        extranonce2: String,
        ntime: u32,
        nonce: u32,
    ) {
        let submitter = match self.state.lock().unwrap().authorized.clone() {
            Some(submitter) => submitter,
            None => {
                self.respond(Response::err(id, ERR_UNAUTHORIZED, "unauthorized"));
                return;
            }
        };

        let submission = Submission {
            job_id,
            extranonce2_hex: extranonce2,
            ntime,
            nonce,
        };
        let result = self
            .server
            .submit_share(&self.conn, &submitter, &submission);

        if result.is_accepted() {
            self.respond(Response::ok(id, serde_json::json!(true)));
        } else {
            self.respond(Response::err(id, result.as_code(), result.reject_reason()));
        }
    }
}

impl Session for StratumSession {
    fn on_read(&self, line: &str) {
        match self.parser.parse(line) {
            Ok(Some(StratumMessage::Subscribe { id, user_agent })) => {
                self.handle_subscribe(id, user_agent)
            }
            Ok(Some(StratumMessage::Authorize {
                id,
                username,
                password,
            })) => self.handle_authorize(id, &username, password),
            Ok(Some(StratumMessage::Submit {
                id,
                job_id,
                extranonce2,
                ntime,
                nonce,
                ..
            })) => self.handle_submit(id, job_id, extranonce2, ntime, nonce),
            Ok(None) => {}
            Err(e) => {
                tracing::debug!("{}: {}", self.conn.session_id(), e);
                self.respond(Response::err(None, ERR_BAD_MESSAGE, "bad request"));
            }
        }
    }

    fn on_disconnect(&self) {
        let state = self.state.lock().unwrap();
        if let Some(submitter) = &state.authorized {
            tracing::debug!(
                "{} ({}) disconnected",
                self.conn.session_id(),
                submitter.full_name
            );
        }
    }

    fn is_authorized(&self) -> bool {
        self.state.lock().unwrap().authorized.is_some()
    }
}

/// Builds a [`StratumSession`] per accepted connection.
pub struct StratumSessionFactory {
    server: Arc<Server>,
}

impl StratumSessionFactory {
    pub fn new(server: Arc<Server>) -> Self {
        Self { server }
    }
}

impl SessionFactory for StratumSessionFactory {
    fn on_connect(&self, conn: Arc<Connection>) -> Arc<dyn Session> {
        Arc::new(StratumSession::new(conn, self.server.clone()))
    }
}
