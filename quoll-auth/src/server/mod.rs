//! Authentication _handling_ mechanics: the gate between the transport
//! and the post-authentication service.
//!
//! Until a request succeeds, only `SSH-USERAUTH` messages are accepted;
//! anything else (channel opens included) disconnects the peer.

use quoll::{
    service::Handler,
    session::Session,
    side::Side,
    wire::{
        msg::{AuthBanner, AuthFailure, AuthMethod, AuthPkOk, AuthRequest, AuthSuccess},
        DisconnectReason,
    },
    Error, Pipe, Result,
};
use signature::Verifier;
use ssh_key::{PublicKey, Signature};

use crate::Methods;

pub mod none;
pub mod password;
pub mod publickey;

/// Give up on a peer after this many failed attempts.
const MAX_AUTH_TRIES: u32 = 10;

/// Upper bound on a presented password, checked before any handler runs.
const MAX_PASSWORD_LEN: usize = 256;

#[derive(Debug, PartialEq)]
enum Attempt {
    Success,
    Failure,
    Continue,
}

/// The authentication service [`Handler`] for sessions, wrapping the
/// service `H` that takes over once the peer is authenticated.
#[derive(Debug)]
pub struct Auth<H, N = (), P = (), PK = ()> {
    banner: Option<String>,
    methods: Methods,
    required: Methods,
    attempts: u32,

    handler: H,

    none: N,
    password: P,
    publickey: PK,
}

impl<H> Auth<H>
where
    H: Handler,
{
    /// Create an [`Auth`] gate, rejecting all authentication by default.
    pub fn new(handler: H) -> Self {
        Self {
            banner: None,
            methods: Methods::NONE, // always answer the `none` probe
            required: Methods::empty(),
            attempts: 0,

            handler,

            none: (),
            password: (),
            publickey: (),
        }
    }
}

impl<H, N, P, PK> Auth<H, N, P, PK>
where
    H: Handler,
    N: none::None,
    P: password::Password,
    PK: publickey::Publickey,
{
    /// Set the authentication banner text displayed before the first
    /// attempt.
    pub fn banner(mut self, banner: impl Into<String>) -> Self {
        self.banner = Some(banner.into());

        self
    }

    /// Require every method in `required` to succeed before the session
    /// authenticates, replying with partial successes in between.
    pub fn require_all(mut self, required: Methods) -> Self {
        self.required = required;

        self
    }

    /// Set the authentication handler for the `none` method.
    pub fn none(self, none: impl none::None) -> Auth<H, impl none::None, P, PK> {
        let Self {
            banner,
            methods,
            required,
            attempts,
            handler,
            none: _,
            password,
            publickey,
        } = self;

        Auth {
            banner,
            methods: methods | Methods::NONE,
            required,
            attempts,
            handler,
            none,
            password,
            publickey,
        }
    }

    /// Set the authentication handler for the `password` method.
    pub fn password(
        self,
        password: impl password::Password,
    ) -> Auth<H, N, impl password::Password, PK> {
        let Self {
            banner,
            methods,
            required,
            attempts,
            handler,
            none,
            password: _,
            publickey,
        } = self;

        Auth {
            banner,
            methods: methods | Methods::PASSWORD,
            required,
            attempts,
            handler,
            none,
            password,
            publickey,
        }
    }

    /// Set the authentication handler for the `publickey` method.
    pub fn publickey(
        self,
        publickey: impl publickey::Publickey,
    ) -> Auth<H, N, P, impl publickey::Publickey> {
        let Self {
            banner,
            methods,
            required,
            attempts,
            handler,
            none,
            password,
            publickey: _,
        } = self;

        Auth {
            banner,
            methods: methods | Methods::PUBLICKEY,
            required,
            attempts,
            handler,
            none,
            password,
            publickey,
        }
    }

    async fn handle_attempt<I: Pipe, S: Side>(
        &mut self,
        session: &mut Session<I, S>,
        request: &AuthRequest,
    ) -> Result<Attempt> {
        let username = request.username.clone();

        Ok(match &request.method {
            AuthMethod::None => match self.none.process(username) {
                none::Response::Accept => Attempt::Success,
                none::Response::Reject => Attempt::Failure,
            },

            AuthMethod::Password { password, new } => {
                if new.is_some() {
                    // Password changing is not supported by this gate.
                    return Ok(Attempt::Failure);
                }
                if password.len() > MAX_PASSWORD_LEN {
                    tracing::warn!("Overlong password attempt for `{username}`");

                    return Ok(Attempt::Failure);
                }

                match self.password.process(username, password.clone()) {
                    password::Response::Accept => Attempt::Success,
                    password::Response::Reject => Attempt::Failure,
                }
            }

            AuthMethod::Publickey {
                algorithm,
                blob,
                signature,
            } => {
                let Ok(key) = PublicKey::from_bytes(blob) else {
                    return Ok(Attempt::Failure);
                };
                if !algorithm_matches(&key, algorithm) {
                    return Ok(Attempt::Failure);
                }

                match signature {
                    None => {
                        // Query phase: acknowledge keys that would pass,
                        // without authenticating anyone.
                        if self.publickey.process(username, key) == publickey::Response::Accept {
                            session
                                .send(&AuthPkOk {
                                    algorithm: algorithm.clone(),
                                    blob: blob.clone(),
                                })
                                .await?;

                            Attempt::Continue
                        } else {
                            Attempt::Failure
                        }
                    }
                    Some(signature) => {
                        let session_id = session
                            .session_id()
                            .expect("authentication attempted before key-exchange")
                            .to_vec();

                        let message = crate::publickey_signed_blob(
                            &session_id,
                            &request.username,
                            &request.service_name,
                            algorithm,
                            blob,
                        )?;

                        let Ok(signature) = Signature::try_from(signature.as_slice()) else {
                            return Ok(Attempt::Failure);
                        };

                        if Verifier::verify(&key, &message, &signature).is_ok()
                            && self.publickey.process(username, key)
                                == publickey::Response::Accept
                        {
                            Attempt::Success
                        } else {
                            Attempt::Failure
                        }
                    }
                }
            }
        })
    }
}

/// Whether the requested signature algorithm fits the presented key; the
/// RSA SHA-2 identifiers are one family over `ssh-rsa` key blobs.
fn algorithm_matches(key: &PublicKey, algorithm: &str) -> bool {
    if key.algorithm().as_str() == algorithm {
        return true;
    }

    matches!(key.algorithm(), ssh_key::Algorithm::Rsa { .. })
        && matches!(algorithm, "ssh-rsa" | "rsa-sha2-256" | "rsa-sha2-512")
}

impl<H, N, P, PK> Handler for Auth<H, N, P, PK>
where
    H: Handler + Send,
    N: none::None,
    P: password::Password,
    PK: publickey::Publickey,
{
    type Err = H::Err;
    type Ok<I: Pipe, S: Side> = H::Ok<I, S>;

    const SERVICE_NAME: &'static str = crate::SERVICE_NAME;

    async fn on_request<I: Pipe, S: Side>(
        &mut self,
        mut session: Session<I, S>,
    ) -> Result<Self::Ok<I, S>, Self::Err> {
        if let Some(message) = self.banner.take() {
            session
                .send(&AuthBanner {
                    message,
                    language: Default::default(),
                })
                .await?;
        }

        loop {
            let packet = session.recv().await?;

            let Ok(request) = packet.to::<AuthRequest>() else {
                // The pre-auth gate: nothing but authentication requests
                // may pass, channel opens included.
                break Err(Error::from(
                    session
                        .disconnect(
                            DisconnectReason::ProtocolError,
                            "Unexpected message before authentication",
                        )
                        .await,
                )
                .into());
            };

            let peer = session.peer_id().to_string();
            let method = request.method.name();

            let known = Methods::from_method_name(method)
                .filter(|flag| self.methods.contains(*flag));
            let Some(flag) = known else {
                session
                    .send(&AuthFailure {
                        continue_with: self.methods.names(),
                        partial_success: false,
                    })
                    .await?;

                continue;
            };

            match self.handle_attempt(&mut session, &request).await? {
                Attempt::Success => {
                    self.required.remove(flag);

                    if !self.required.is_empty() {
                        tracing::info!(
                            "Auth method `{method}` succeeded for `{}` from `{peer}`, more required",
                            request.username,
                        );

                        session
                            .send(&AuthFailure {
                                continue_with: self.required.names(),
                                partial_success: true,
                            })
                            .await?;

                        continue;
                    }

                    if request.service_name != H::SERVICE_NAME {
                        break Err(Error::from(
                            session
                                .disconnect(
                                    DisconnectReason::ServiceNotAvailable,
                                    "Requested service is unknown",
                                )
                                .await,
                        )
                        .into());
                    }

                    tracing::info!(
                        "Auth succeeded for `{}` from `{peer}` with method `{method}`",
                        request.username,
                    );

                    session.send(&AuthSuccess).await?;
                    session.set_authenticated();

                    break self.handler.on_request(session).await;
                }
                Attempt::Failure => {
                    tracing::warn!(
                        "Auth method `{method}` failed for `{}` from `{peer}`",
                        request.username,
                    );

                    self.attempts += 1;
                    if self.attempts >= MAX_AUTH_TRIES {
                        break Err(Error::from(
                            session
                                .disconnect(
                                    DisconnectReason::NoMoreAuthMethodsAvailable,
                                    "Too many authentication attempts",
                                )
                                .await,
                        )
                        .into());
                    }

                    session
                        .send(&AuthFailure {
                            continue_with: self.methods.names(),
                            partial_success: false,
                        })
                        .await?;
                }
                Attempt::Continue => (),
            }
        }
    }
}
