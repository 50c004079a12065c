//! Client-side authentication mechanics.
//!
//! The requester always opens with the `none` method to discover what
//! the server accepts, then walks its configured keys (query first, then
//! the signed request) and finally the password, honoring the
//! `server-sig-algs` extension for RSA keys.

use std::collections::VecDeque;

use quoll::{
    service::Request,
    session::Session,
    side::Side,
    wire::{
        msg::{AuthBanner, AuthFailure, AuthMethod, AuthPkOk, AuthRequest, AuthSuccess},
        DisconnectReason, Wire,
    },
    Error, Pipe, Result,
};
use signature::{SignatureEncoding, Signer};
use ssh_key::Signature;

#[doc(no_inline)]
pub use ssh_key::PrivateKey;

use crate::SERVICE_NAME;

enum Method {
    Publickey(Box<PrivateKey>),
    Password(String),
}

/// The authentication [`Request`] for client sessions, wrapping the
/// service `R` to continue into once authenticated.
pub struct Auth<R> {
    username: String,
    keys: Vec<PrivateKey>,
    password: Option<String>,

    pending_key: Option<Box<PrivateKey>>,

    service: R,
}

impl<R> Auth<R>
where
    R: Request,
{
    /// Create an [`Auth`] requester for the provided _username_.
    pub fn new(username: impl Into<String>, service: R) -> Self {
        Self {
            username: username.into(),
            keys: Vec::new(),
            password: None,
            pending_key: None,
            service,
        }
    }

    /// Attempt the `password` method with this password, after the keys.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());

        self
    }

    /// Attempt the `publickey` method with this key.
    pub fn publickey(mut self, key: impl Into<PrivateKey>) -> Self {
        self.keys.push(key.into());

        self
    }

    /// The signature algorithm to present a key under, or `None` when
    /// the server explicitly refuses it through `server-sig-algs`.
    fn algorithm_for<I: Pipe, S: Side>(
        session: &Session<I, S>,
        key: &PrivateKey,
    ) -> Option<String> {
        let name = match key.algorithm() {
            // `ssh-key` signs RSA under SHA-512.
            ssh_key::Algorithm::Rsa { .. } => "rsa-sha2-512".to_owned(),
            algorithm => algorithm.as_str().to_owned(),
        };

        match session.extensions().server_sig_algs.as_ref() {
            Some(algorithms) if !algorithms.iter().any(|advertised| advertised == &name) => {
                tracing::debug!("Server refuses `{name}` signatures, skipping key");

                None
            }
            _ => Some(name),
        }
    }

    fn signed_request<I: Pipe, S: Side>(
        &self,
        session: &Session<I, S>,
        key: &PrivateKey,
    ) -> Result<AuthRequest> {
        let algorithm =
            Self::algorithm_for(session, key).ok_or(Error::UnsupportedAlgorithm)?;
        let blob = key.public_key().to_bytes()?;

        let session_id = session
            .session_id()
            .expect("authentication attempted before key-exchange");
        let message = crate::publickey_signed_blob(
            session_id,
            &self.username,
            R::SERVICE_NAME,
            &algorithm,
            &blob,
        )?;

        let signature: Signature = key.try_sign(&message)?;

        Ok(AuthRequest {
            username: self.username.clone(),
            service_name: R::SERVICE_NAME.into(),
            method: AuthMethod::Publickey {
                algorithm,
                blob,
                signature: Some(signature.to_vec()),
            },
        })
    }
}

impl<R> Request for Auth<R>
where
    R: Request + Send,
{
    type Err = R::Err;
    type Ok<I: Pipe, S: Side> = R::Ok<I, S>;

    const SERVICE_NAME: &'static str = SERVICE_NAME;

    async fn on_accept<I: Pipe, S: Side>(
        &mut self,
        mut session: Session<I, S>,
    ) -> Result<Self::Ok<I, S>, Self::Err> {
        let mut queue: VecDeque<Method> = self
            .keys
            .drain(..)
            .map(Box::new)
            .map(Method::Publickey)
            .chain(self.password.take().map(Method::Password))
            .collect();

        // Discover the available methods with a `none` probe.
        session
            .send(&AuthRequest {
                username: self.username.clone(),
                service_name: R::SERVICE_NAME.into(),
                method: AuthMethod::None,
            })
            .await?;

        loop {
            let packet = session.recv().await?;

            match packet.message_id() {
                id if id == AuthSuccess::ID => {
                    tracing::debug!("Authenticated as `{}`", self.username);
                    session.set_authenticated();

                    break self.service.on_accept(session).await;
                }

                id if id == AuthBanner::ID => {
                    let banner: AuthBanner = packet.to()?;
                    tracing::info!("{}", banner.message.trim_end());
                }

                id if id == AuthPkOk::ID => {
                    let Some(key) = self.pending_key.take() else {
                        break Err(Error::UnexpectedMessage.into());
                    };

                    let request = self.signed_request(&session, &key)?;
                    session.send(&request).await?;
                }

                id if id == AuthFailure::ID => {
                    let failure: AuthFailure = packet.to()?;
                    self.pending_key = None;

                    let mut sent = false;
                    while !sent {
                        let Some(method) = queue.pop_front() else {
                            break;
                        };

                        match method {
                            Method::Publickey(key)
                                if failure.continue_with.contains("publickey") =>
                            {
                                let Some(algorithm) = Self::algorithm_for(&session, &key)
                                else {
                                    continue;
                                };
                                let blob = key.public_key().to_bytes().map_err(Error::from)?;

                                session
                                    .send(&AuthRequest {
                                        username: self.username.clone(),
                                        service_name: R::SERVICE_NAME.into(),
                                        method: AuthMethod::Publickey {
                                            algorithm,
                                            blob,
                                            signature: None,
                                        },
                                    })
                                    .await?;
                                self.pending_key = Some(key);
                                sent = true;
                            }
                            Method::Password(password)
                                if failure.continue_with.contains("password") =>
                            {
                                session
                                    .send(&AuthRequest {
                                        username: self.username.clone(),
                                        service_name: R::SERVICE_NAME.into(),
                                        method: AuthMethod::Password {
                                            password,
                                            new: None,
                                        },
                                    })
                                    .await?;
                                sent = true;
                            }
                            _ => continue,
                        }
                    }

                    if !sent {
                        break Err(Error::from(
                            session
                                .disconnect(
                                    DisconnectReason::NoMoreAuthMethodsAvailable,
                                    "Authentication methods exhausted for the current session",
                                )
                                .await,
                        )
                        .into());
                    }
                }

                _ => break Err(Error::UnexpectedMessage.into()),
            }
        }
    }
}
