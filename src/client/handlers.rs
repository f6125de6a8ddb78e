//! Library-internal protocol handlers.
//!
//! These are prepended to the callback registry so they run before any
//! user handlers and user code observes post-processed state (current
//! nick updated, capability maps settled, ISUPPORT absorbed).

use std::sync::Arc;

use chrono::Utc;
use tracing::warn;

use crate::caps::{compute_flags, split_cap_token};
use crate::client::{CapResult, Connection, SaslOutcome};
use crate::ctcp;
use crate::message::Message;
use crate::registry::Callback;
use crate::response::Response;
use crate::sasl::{encode_response, plain_response, SaslMechanism};

impl Connection {
    /// Install the protocol handlers, once per connection lifetime.
    pub(crate) fn setup_callbacks(&self) {
        {
            let mut state = self.state();
            if state.has_base_callbacks {
                return;
            }
            state.has_base_callbacks = true;
        }

        // PING: respond with the matching PONG
        self.prepend_callback("PING", |conn, e| {
            let _ = conn.send("PONG", &[e.last_param().unwrap_or("")]);
        });

        // PONG: match our keepalive token so the server proves liveness
        self.prepend_callback("PONG", |conn, e| {
            conn.record_pong(e.last_param().unwrap_or(""));
        });

        // 433/437: nick collision before registration
        self.prepend_callback(
            &Response::ERR_NICKNAMEINUSE.code_str(),
            handle_unavailable_nick,
        );
        self.prepend_callback(
            &Response::ERR_UNAVAILRESOURCE.code_str(),
            handle_unavailable_nick,
        );

        // 001: the server tells us the nick we actually got
        self.prepend_callback(&Response::RPL_WELCOME.code_str(), |conn, e| {
            if let Some(nick) = e.params.first() {
                conn.set_current_nick(nick);
            }
        });

        // 005: accumulate ISUPPORT until registration completes
        self.prepend_callback(&Response::RPL_ISUPPORT.code_str(), |conn, e| {
            let mut state = conn.state();
            if state.registered {
                return;
            }
            if let Some(partial) = state.isupport_partial.as_mut() {
                partial.absorb_params(&e.params);
            }
        });

        // NICK from the server, echoing ours or renaming us unprompted
        self.prepend_callback("NICK", |conn, e| {
            let current = conn.current_nick();
            if !current.is_empty() && e.nick() == Some(current.as_str()) {
                if let Some(new_nick) = e.params.first() {
                    conn.set_current_nick(new_nick);
                }
            }
        });

        self.prepend_callback("ERROR", |conn, e| {
            if !conn.is_quitting() {
                warn!("ERROR received from server: {}", e.params.join(" "));
            }
        });

        self.prepend_callback("CAP", handle_cap);

        if self.config.use_sasl {
            self.setup_sasl_callbacks();
        }

        if self.config.enable_ctcp {
            self.setup_ctcp_callbacks();
        }

        // end of registration, both the MOTD and the no-MOTD form
        self.prepend_callback(&Response::RPL_ENDOFMOTD.code_str(), handle_registration);
        self.prepend_callback(&Response::ERR_NOMOTD.code_str(), handle_registration);

        self.prepend_callback("FAIL", handle_standard_replies);
        self.prepend_callback("WARN", handle_standard_replies);
        self.prepend_callback("NOTE", handle_standard_replies);
    }

    fn prepend_callback<F>(&self, command: &str, callback: F)
    where
        F: Fn(&Connection, &Message) + Send + Sync + 'static,
    {
        self.add_callback_internal(command, Arc::new(callback), true, None);
    }

    fn setup_sasl_callbacks(&self) {
        // server is ready for our credentials
        self.prepend_callback("AUTHENTICATE", |conn, _e| {
            match conn.config.sasl_mech {
                SaslMechanism::Plain => {
                    let raw = plain_response(
                        &conn.config.sasl_login,
                        &conn.config.sasl_password,
                    );
                    for chunk in encode_response(&raw) {
                        let _ = conn.send("AUTHENTICATE", &[&chunk]);
                    }
                }
                SaslMechanism::External => {
                    let _ = conn.send("AUTHENTICATE", &["+"]);
                }
            }
        });

        let failure: Callback = Arc::new(|conn: &Connection, e: &Message| {
            let _ = conn.send_raw("CAP END");
            let _ = conn.send_raw("QUIT");
            let reason = e
                .params
                .get(1)
                .cloned()
                .unwrap_or_else(|| e.params.join(" "));
            conn.submit_sasl(SaslOutcome::Failed(reason));
        });
        for code in [
            Response::RPL_LOGGEDOUT,
            Response::ERR_NICKLOCKED,
            Response::ERR_SASLFAIL,
        ] {
            self.add_callback_internal(&code.code_str(), failure.clone(), true, None);
        }

        let success: Callback = Arc::new(|conn: &Connection, _e: &Message| {
            conn.submit_sasl(SaslOutcome::Success);
        });
        // 907 can happen with auto-login via certificate fingerprint
        for code in [Response::RPL_SASLSUCCESS, Response::ERR_SASLALREADY] {
            self.add_callback_internal(&code.code_str(), success.clone(), true, None);
        }
    }

    fn setup_ctcp_callbacks(&self) {
        self.prepend_callback(ctcp::CTCP_VERSION, |conn, e| {
            if let Some(nick) = e.nick() {
                let _ = conn.send_raw(&format!(
                    "NOTICE {} :\u{1}VERSION {}\u{1}",
                    nick, conn.config.version
                ));
            }
        });

        self.prepend_callback(ctcp::CTCP_USERINFO, |conn, e| {
            if let Some(nick) = e.nick() {
                let _ = conn.send_raw(&format!(
                    "NOTICE {} :\u{1}USERINFO {}\u{1}",
                    nick, conn.config.user
                ));
            }
        });

        self.prepend_callback(ctcp::CTCP_CLIENTINFO, |conn, e| {
            if let Some(nick) = e.nick() {
                let _ = conn.send_raw(&format!(
                    "NOTICE {} :\u{1}CLIENTINFO PING VERSION TIME USERINFO CLIENTINFO\u{1}",
                    nick
                ));
            }
        });

        self.prepend_callback(ctcp::CTCP_TIME, |conn, e| {
            if let Some(nick) = e.nick() {
                let now = Utc::now().format("%a, %d %b %Y %H:%M:%S UTC");
                let _ = conn.send_raw(&format!("NOTICE {} :\u{1}TIME {}\u{1}", nick, now));
            }
        });

        self.prepend_callback(ctcp::CTCP_PING, |conn, e| {
            if let (Some(nick), Some(payload)) = (e.nick(), e.params.get(1)) {
                let _ = conn.send_raw(&format!("NOTICE {} :\u{1}{}\u{1}", nick, payload));
            }
        });
    }

    fn submit_sasl(&self, outcome: SaslOutcome) {
        let tx = self.state().sasl_tx.clone();
        if let Some(tx) = tx {
            let _ = tx.try_send(outcome);
        }
    }

    /// CAP LS: accumulate advertised caps; on the final line, request
    /// the advertised subset of the want-set in one REQ and synthesize
    /// negative results for the misses.
    fn handle_cap_ls(&self, params: &[String]) {
        let mut to_request: Vec<String> = Vec::new();
        let mut missing: Vec<String> = Vec::new();
        let caps_tx;
        {
            let mut state = self.state();
            if state.registered {
                return;
            }

            // multiline LS continues with a positional `*` marker:
            //   CAP * LS * :account-notify away-notify ...
            // and ends with the three-parameter form:
            //   CAP * LS :userhost-in-names ...
            let final_line = params.len() == 1;
            if let Some(tokens) = params.last() {
                for token in tokens.split_whitespace() {
                    let (name, value) = split_cap_token(token);
                    state
                        .caps_advertised
                        .insert(name.to_owned(), value.to_owned());
                }
            }

            if final_line {
                for cap in &self.config.request_caps {
                    if state.caps_advertised.contains_key(cap) {
                        to_request.push(cap.clone());
                    } else {
                        missing.push(cap.clone());
                    }
                }
            }
            caps_tx = state.caps_tx.clone();
        }

        if !to_request.is_empty() {
            let _ = self.send("CAP", &["REQ", &to_request.join(" ")]);
        }
        if let Some(tx) = caps_tx {
            for name in missing {
                let _ = tx.try_send(CapResult { name, ack: false });
            }
        }
    }

    /// CAP ACK/NAK: update the acknowledged map (ACK may carry `-name`
    /// removals), recompute the negotiated flags, and feed the
    /// negotiation counter for caps we asked for.
    fn handle_cap_ack_nak(&self, tokens: &str, ack: bool) {
        let mut results: Vec<CapResult> = Vec::new();
        let caps_tx;
        {
            let mut state = self.state();
            for token in tokens.split_whitespace() {
                let (name, _) = split_cap_token(token);
                let plain = name.strip_prefix('-').unwrap_or(name);

                if ack {
                    if name.starts_with('-') {
                        state.caps_acked.remove(plain);
                    } else {
                        let value = state
                            .caps_advertised
                            .get(plain)
                            .cloned()
                            .unwrap_or_default();
                        state.caps_acked.insert(plain.to_owned(), value);
                    }
                }

                if self.config.request_caps.iter().any(|c| c == plain) {
                    results.push(CapResult {
                        name: plain.to_owned(),
                        ack,
                    });
                }
            }
            self.flags
                .store(compute_flags(state.caps_acked.keys().map(String::as_str)));
            caps_tx = state.caps_tx.clone();
        }

        if let Some(tx) = caps_tx {
            for result in results {
                let _ = tx.try_send(result);
            }
        }
    }

    /// CAP NEW (cap-notify): newly advertised caps are re-requested if
    /// they are in the want-set and not already enabled.
    fn handle_cap_new(&self, tokens: &str) {
        let mut to_request: Vec<String> = Vec::new();
        {
            let mut state = self.state();
            for token in tokens.split_whitespace() {
                let (name, value) = split_cap_token(token);
                state
                    .caps_advertised
                    .insert(name.to_owned(), value.to_owned());
                if self.config.request_caps.iter().any(|c| c == name)
                    && !state.caps_acked.contains_key(name)
                {
                    to_request.push(name.to_owned());
                }
            }
        }
        if !to_request.is_empty() {
            let _ = self.send("CAP", &["REQ", &to_request.join(" ")]);
        }
    }

    /// CAP DEL (cap-notify): withdrawn caps leave both the advertised
    /// and the acknowledged maps.
    fn handle_cap_del(&self, tokens: &str) {
        let mut state = self.state();
        for token in tokens.split_whitespace() {
            let (name, _) = split_cap_token(token);
            state.caps_advertised.remove(name);
            state.caps_acked.remove(name);
        }
        self.flags
            .store(compute_flags(state.caps_acked.keys().map(String::as_str)));
    }
}

fn handle_cap(conn: &Connection, e: &Message) {
    // CAP <nick|*> <subcommand> params...
    if e.params.len() < 3 {
        return;
    }
    match e.params[1].as_str() {
        "LS" => conn.handle_cap_ls(&e.params[2..]),
        "ACK" => conn.handle_cap_ack_nak(&e.params[2], true),
        "NAK" => conn.handle_cap_ack_nak(&e.params[2], false),
        "NEW" => conn.handle_cap_new(&e.params[2]),
        "DEL" => conn.handle_cap_del(&e.params[2]),
        _ => {}
    }
}

/// End of MOTD (or no MOTD): registration is complete. Freezes the
/// ISUPPORT map and wakes the connecting task.
fn handle_registration(conn: &Connection, _e: &Message) {
    let welcome_tx = {
        let mut state = conn.state();
        if !state.registered {
            state.registered = true;
            let partial = state.isupport_partial.take().unwrap_or_default();
            state.isupport = Some(std::sync::Arc::new(partial));
        }
        state.welcome_tx.clone()
    };
    if let Some(tx) = welcome_tx {
        let _ = tx.try_send(());
    }
}

/// 433/437: before registration, try the next suffixed nick. After
/// registration the keepalive task owns nick restoration, so responding
/// here would swap one undesired nick for another.
fn handle_unavailable_nick(conn: &Connection, _e: &Message) {
    let nick_to_try = {
        let mut state = conn.state();
        if state.current_nick.is_empty() {
            state.nick_counter += 1;
            Some(format!("{}_{}", state.preferred_nick, state.nick_counter))
        } else {
            None
        }
    };
    if let Some(nick) = nick_to_try {
        let _ = conn.send("NICK", &[&nick]);
    }
}

fn handle_standard_replies(_conn: &Connection, e: &Message) {
    match e.command.as_str() {
        "FAIL" | "WARN" => {
            warn!(
                "received error code from server: {} {}",
                e.command,
                e.params.join(" ")
            );
        }
        _ => {}
    }
}
