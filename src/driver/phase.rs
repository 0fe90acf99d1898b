//! Startup phases: authentication, then session initialization.
use super::{Control, Driver, Phase, Reply};
use crate::{
    Error,
    datetime::DateTimeMode,
    postgres::{BackendMessage, ProtocolError, backend::Authentication, frontend},
};

impl Driver {
    /// Runs between the startup packet and `AuthenticationOk`.
    ///
    /// Messages outside the authentication exchange are legal here
    /// (ParameterStatus, NoticeResponse) and fall through to the
    /// steady-state dispatcher.
    pub(super) fn on_auth_message(&mut self, message: BackendMessage) -> Control {
        match message {
            BackendMessage::Authentication(auth) => match auth {
                Authentication::Ok => {
                    self.phase = Phase::Init;
                    Control::Continue
                }
                Authentication::CleartextPassword => {
                    frontend::write(
                        frontend::PasswordMessage { password: &self.password },
                        &mut self.wbuf,
                    );
                    Control::Continue
                }
                Authentication::Md5Password { salt } => {
                    let hashed = md5_password(&self.user, &self.password, salt);
                    frontend::write(frontend::PasswordMessage { password: &hashed }, &mut self.wbuf);
                    Control::Continue
                }
                Authentication::Unsupported { name } => {
                    self.fail_startup(Error::UnsupportedAuth(name.into()))
                }
                Authentication::Unknown { .. } => {
                    self.fail_startup(Error::UnsupportedAuth("unknown".into()))
                }
            },
            BackendMessage::ErrorResponse(err) => {
                self.fail_startup(Error::from_auth_response(err))
            }
            other => self.on_ready_message(other),
        }
    }

    /// Runs between `AuthenticationOk` and the first `ReadyForQuery`.
    ///
    /// The backend process is being started; the session parameters and
    /// the cancellation key stream in before the connection becomes usable.
    pub(super) fn on_init_message(&mut self, message: BackendMessage) -> Control {
        match message {
            BackendMessage::ParameterStatus(status) => {
                self.parameters
                    .insert(status.name.to_string(), status.value.to_string());
                Control::Continue
            }
            BackendMessage::BackendKeyData(key) => {
                self.backend_key = Some(key);
                Control::Continue
            }
            BackendMessage::ReadyForQuery(ready) => {
                self.tx_status = ready.tx_status;
                self.datetime_mode = self
                    .parameters
                    .get("integer_datetimes")
                    .map(|v| DateTimeMode::from_parameter(v))
                    .unwrap_or_default();

                let Some(key) = self.backend_key else {
                    return Control::Teardown(
                        ProtocolError::unexpected_phase("ReadyForQuery", "startup before BackendKeyData")
                            .into(),
                    );
                };

                self.phase = Phase::Ready;
                self.finish_head(Reply::Connected(key));
                Control::Continue
            }
            BackendMessage::ErrorResponse(err) => {
                self.fail_startup(Error::from_auth_response(err))
            }
            BackendMessage::NegotiateProtocolVersion(version) => {
                self.fail_startup(ProtocolError::Negotiate { minor: version.minor }.into())
            }
            other => self.on_ready_message(other),
        }
    }

    /// Deliver a startup failure to the connect request and stop.
    fn fail_startup(&mut self, err: Error) -> Control {
        self.finish_head_with(Err(err));
        Control::Shutdown
    }
}

/// The md5 password response: `"md5" ++ hex(md5(hex(md5(password ++ user)) ++ salt))`.
pub(super) fn md5_password(user: &str, password: &str, salt: [u8; 4]) -> String {
    let inner = format!("{:x}", md5::compute(format!("{password}{user}")));
    let mut salted = Vec::with_capacity(inner.len() + salt.len());
    salted.extend_from_slice(inner.as_bytes());
    salted.extend_from_slice(&salt);
    format!("md5{:x}", md5::compute(salted))
}
