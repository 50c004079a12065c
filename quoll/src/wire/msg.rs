//! Typed wire messages for the transport (`SSH-TRANS`), authentication
//! (`SSH-USERAUTH`) and connection (`SSH-CONNECT`) protocols, as defined
//! in RFC 4253, RFC 4252, RFC 4254, RFC 5656 and RFC 8308.

use super::{Buffer, MpInt, NameList, Wire, WireError};

pub(crate) const SSH_MSG_DISCONNECT: u8 = 1;
pub(crate) const SSH_MSG_IGNORE: u8 = 2;
pub(crate) const SSH_MSG_UNIMPLEMENTED: u8 = 3;
pub(crate) const SSH_MSG_DEBUG: u8 = 4;
pub(crate) const SSH_MSG_SERVICE_REQUEST: u8 = 5;
pub(crate) const SSH_MSG_SERVICE_ACCEPT: u8 = 6;
pub(crate) const SSH_MSG_EXT_INFO: u8 = 7;
pub(crate) const SSH_MSG_KEXINIT: u8 = 20;
pub(crate) const SSH_MSG_NEWKEYS: u8 = 21;
pub(crate) const SSH_MSG_KEXDH_INIT: u8 = 30;
pub(crate) const SSH_MSG_KEXDH_REPLY: u8 = 31;
pub(crate) const SSH_MSG_USERAUTH_REQUEST: u8 = 50;
pub(crate) const SSH_MSG_USERAUTH_FAILURE: u8 = 51;
pub(crate) const SSH_MSG_USERAUTH_SUCCESS: u8 = 52;
pub(crate) const SSH_MSG_USERAUTH_BANNER: u8 = 53;
pub(crate) const SSH_MSG_USERAUTH_PK_OK: u8 = 60;
pub(crate) const SSH_MSG_GLOBAL_REQUEST: u8 = 80;
pub(crate) const SSH_MSG_REQUEST_SUCCESS: u8 = 81;
pub(crate) const SSH_MSG_REQUEST_FAILURE: u8 = 82;
pub(crate) const SSH_MSG_CHANNEL_OPEN: u8 = 90;
pub(crate) const SSH_MSG_CHANNEL_OPEN_CONFIRMATION: u8 = 91;
pub(crate) const SSH_MSG_CHANNEL_OPEN_FAILURE: u8 = 92;
pub(crate) const SSH_MSG_CHANNEL_WINDOW_ADJUST: u8 = 93;
pub(crate) const SSH_MSG_CHANNEL_DATA: u8 = 94;
pub(crate) const SSH_MSG_CHANNEL_EXTENDED_DATA: u8 = 95;
pub(crate) const SSH_MSG_CHANNEL_EOF: u8 = 96;
pub(crate) const SSH_MSG_CHANNEL_CLOSE: u8 = 97;
pub(crate) const SSH_MSG_CHANNEL_REQUEST: u8 = 98;
pub(crate) const SSH_MSG_CHANNEL_SUCCESS: u8 = 99;
pub(crate) const SSH_MSG_CHANNEL_FAILURE: u8 = 100;

/// The `SSH_MSG_DISCONNECT` message.
///
/// see <https://datatracker.ietf.org/doc/html/rfc4253#section-11.1>.
#[derive(Debug, Clone)]
pub struct Disconnect {
    /// Reason for disconnection.
    pub reason: DisconnectReason,

    /// Description of the reason for disconnection.
    pub description: String,

    /// Language tag.
    pub language: String,
}

impl Wire for Disconnect {
    const ID: u8 = SSH_MSG_DISCONNECT;

    fn encode(&self, buf: &mut Buffer) -> Result<(), WireError> {
        buf.put_u32(self.reason.into())?;
        buf.put_string(self.description.as_bytes())?;
        buf.put_string(self.language.as_bytes())
    }

    fn decode(buf: &mut Buffer) -> Result<Self, WireError> {
        Ok(Self {
            reason: buf.get_u32()?.into(),
            description: buf.get_string_utf8()?,
            language: buf.get_string_utf8()?,
        })
    }
}

/// The `reason` for disconnect in the [`Disconnect`] message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// `SSH_DISCONNECT_HOST_NOT_ALLOWED_TO_CONNECT`.
    HostNotAllowedToConnect,

    /// `SSH_DISCONNECT_PROTOCOL_ERROR`.
    ProtocolError,

    /// `SSH_DISCONNECT_KEY_EXCHANGE_FAILED`.
    KeyExchangeFailed,

    /// `SSH_DISCONNECT_RESERVED`.
    Reserved,

    /// `SSH_DISCONNECT_MAC_ERROR`.
    MacError,

    /// `SSH_DISCONNECT_COMPRESSION_ERROR`.
    CompressionError,

    /// `SSH_DISCONNECT_SERVICE_NOT_AVAILABLE`.
    ServiceNotAvailable,

    /// `SSH_DISCONNECT_PROTOCOL_VERSION_NOT_SUPPORTED`.
    ProtocolVersionNotSupported,

    /// `SSH_DISCONNECT_HOST_KEY_NOT_VERIFIABLE`.
    HostKeyNotVerifiable,

    /// `SSH_DISCONNECT_CONNECTION_LOST`.
    ConnectionLost,

    /// `SSH_DISCONNECT_BY_APPLICATION`.
    ByApplication,

    /// `SSH_DISCONNECT_TOO_MANY_CONNECTIONS`.
    TooManyConnections,

    /// `SSH_DISCONNECT_AUTH_CANCELLED_BY_USER`.
    AuthCancelledByUser,

    /// `SSH_DISCONNECT_NO_MORE_AUTH_METHODS_AVAILABLE`.
    NoMoreAuthMethodsAvailable,

    /// `SSH_DISCONNECT_ILLEGAL_USER_NAME`.
    IllegalUserName,

    /// Any other disconnect reason, may be non-standard.
    Other(u32),
}

impl From<u32> for DisconnectReason {
    fn from(code: u32) -> Self {
        match code {
            1 => Self::HostNotAllowedToConnect,
            2 => Self::ProtocolError,
            3 => Self::KeyExchangeFailed,
            4 => Self::Reserved,
            5 => Self::MacError,
            6 => Self::CompressionError,
            7 => Self::ServiceNotAvailable,
            8 => Self::ProtocolVersionNotSupported,
            9 => Self::HostKeyNotVerifiable,
            10 => Self::ConnectionLost,
            11 => Self::ByApplication,
            12 => Self::TooManyConnections,
            13 => Self::AuthCancelledByUser,
            14 => Self::NoMoreAuthMethodsAvailable,
            15 => Self::IllegalUserName,
            other => Self::Other(other),
        }
    }
}

impl From<DisconnectReason> for u32 {
    fn from(reason: DisconnectReason) -> Self {
        match reason {
            DisconnectReason::HostNotAllowedToConnect => 1,
            DisconnectReason::ProtocolError => 2,
            DisconnectReason::KeyExchangeFailed => 3,
            DisconnectReason::Reserved => 4,
            DisconnectReason::MacError => 5,
            DisconnectReason::CompressionError => 6,
            DisconnectReason::ServiceNotAvailable => 7,
            DisconnectReason::ProtocolVersionNotSupported => 8,
            DisconnectReason::HostKeyNotVerifiable => 9,
            DisconnectReason::ConnectionLost => 10,
            DisconnectReason::ByApplication => 11,
            DisconnectReason::TooManyConnections => 12,
            DisconnectReason::AuthCancelledByUser => 13,
            DisconnectReason::NoMoreAuthMethodsAvailable => 14,
            DisconnectReason::IllegalUserName => 15,
            DisconnectReason::Other(code) => code,
        }
    }
}

/// The `SSH_MSG_IGNORE` message.
#[derive(Debug, Default, Clone)]
pub struct Ignore {
    /// A blob of data for the peer to discard.
    pub data: Vec<u8>,
}

impl Wire for Ignore {
    const ID: u8 = SSH_MSG_IGNORE;

    fn encode(&self, buf: &mut Buffer) -> Result<(), WireError> {
        buf.put_string(&self.data)
    }

    fn decode(buf: &mut Buffer) -> Result<Self, WireError> {
        Ok(Self {
            data: buf.get_string()?,
        })
    }
}

/// The `SSH_MSG_UNIMPLEMENTED` message.
#[derive(Debug, Clone)]
pub struct Unimplemented {
    /// Sequence number of the rejected packet.
    pub seq: u32,
}

impl Wire for Unimplemented {
    const ID: u8 = SSH_MSG_UNIMPLEMENTED;

    fn encode(&self, buf: &mut Buffer) -> Result<(), WireError> {
        buf.put_u32(self.seq)
    }

    fn decode(buf: &mut Buffer) -> Result<Self, WireError> {
        Ok(Self {
            seq: buf.get_u32()?,
        })
    }
}

/// The `SSH_MSG_DEBUG` message.
#[derive(Debug, Default, Clone)]
pub struct Debug {
    /// Whether the message should be forcefully displayed.
    pub always_display: bool,

    /// The debug message.
    pub message: String,

    /// Language tag.
    pub language: String,
}

impl Wire for Debug {
    const ID: u8 = SSH_MSG_DEBUG;

    fn encode(&self, buf: &mut Buffer) -> Result<(), WireError> {
        buf.put_bool(self.always_display)?;
        buf.put_string(self.message.as_bytes())?;
        buf.put_string(self.language.as_bytes())
    }

    fn decode(buf: &mut Buffer) -> Result<Self, WireError> {
        Ok(Self {
            always_display: buf.get_bool()?,
            message: buf.get_string_utf8()?,
            language: buf.get_string_utf8()?,
        })
    }
}

/// The `SSH_MSG_SERVICE_REQUEST` message.
#[derive(Debug, Clone)]
pub struct ServiceRequest {
    /// The service name to request.
    pub service_name: String,
}

impl Wire for ServiceRequest {
    const ID: u8 = SSH_MSG_SERVICE_REQUEST;

    fn encode(&self, buf: &mut Buffer) -> Result<(), WireError> {
        buf.put_string(self.service_name.as_bytes())
    }

    fn decode(buf: &mut Buffer) -> Result<Self, WireError> {
        Ok(Self {
            service_name: buf.get_string_utf8()?,
        })
    }
}

/// The `SSH_MSG_SERVICE_ACCEPT` message.
#[derive(Debug, Clone)]
pub struct ServiceAccept {
    /// Service name accepted to be requested.
    pub service_name: String,
}

impl Wire for ServiceAccept {
    const ID: u8 = SSH_MSG_SERVICE_ACCEPT;

    fn encode(&self, buf: &mut Buffer) -> Result<(), WireError> {
        buf.put_string(self.service_name.as_bytes())
    }

    fn decode(buf: &mut Buffer) -> Result<Self, WireError> {
        Ok(Self {
            service_name: buf.get_string_utf8()?,
        })
    }
}

/// The `SSH_MSG_EXT_INFO` message.
///
/// see <https://datatracker.ietf.org/doc/html/rfc8308#section-2.3>.
#[derive(Debug, Default, Clone)]
pub struct ExtInfo {
    /// Advertised `(name, value)` extension pairs.
    pub extensions: Vec<(String, Vec<u8>)>,
}

impl Wire for ExtInfo {
    const ID: u8 = SSH_MSG_EXT_INFO;

    fn encode(&self, buf: &mut Buffer) -> Result<(), WireError> {
        buf.put_u32(self.extensions.len() as u32)?;
        for (name, value) in &self.extensions {
            buf.put_string(name.as_bytes())?;
            buf.put_string(value)?;
        }

        Ok(())
    }

    fn decode(buf: &mut Buffer) -> Result<Self, WireError> {
        let count = buf.get_u32()?;

        let mut extensions = Vec::new();
        for _ in 0..count {
            extensions.push((buf.get_string_utf8()?, buf.get_string()?));
        }

        Ok(Self { extensions })
    }
}

/// The `SSH_MSG_KEXINIT` message.
///
/// see <https://datatracker.ietf.org/doc/html/rfc4253#section-7.1>.
#[derive(Debug, Clone)]
pub struct KexInit {
    /// The kex-init cookie.
    pub cookie: [u8; 16],

    /// Kex algorithms.
    pub kex_algorithms: NameList,

    /// Server host-key algorithms.
    pub server_host_key_algorithms: NameList,

    /// Client -> server encryption algorithms.
    pub encryption_algorithms_client_to_server: NameList,

    /// Server -> client encryption algorithms.
    pub encryption_algorithms_server_to_client: NameList,

    /// Client -> server MAC algorithms.
    pub mac_algorithms_client_to_server: NameList,

    /// Server -> client MAC algorithms.
    pub mac_algorithms_server_to_client: NameList,

    /// Client -> server compression algorithms.
    pub compression_algorithms_client_to_server: NameList,

    /// Server -> client compression algorithms.
    pub compression_algorithms_server_to_client: NameList,

    /// Client -> server languages.
    pub languages_client_to_server: NameList,

    /// Server -> client languages.
    pub languages_server_to_client: NameList,

    /// Whether a guessed kex packet follows.
    pub first_kex_packet_follows: bool,
}

impl Wire for KexInit {
    const ID: u8 = SSH_MSG_KEXINIT;

    fn encode(&self, buf: &mut Buffer) -> Result<(), WireError> {
        buf.put_bytes(&self.cookie)?;
        buf.put_name_list(&self.kex_algorithms)?;
        buf.put_name_list(&self.server_host_key_algorithms)?;
        buf.put_name_list(&self.encryption_algorithms_client_to_server)?;
        buf.put_name_list(&self.encryption_algorithms_server_to_client)?;
        buf.put_name_list(&self.mac_algorithms_client_to_server)?;
        buf.put_name_list(&self.mac_algorithms_server_to_client)?;
        buf.put_name_list(&self.compression_algorithms_client_to_server)?;
        buf.put_name_list(&self.compression_algorithms_server_to_client)?;
        buf.put_name_list(&self.languages_client_to_server)?;
        buf.put_name_list(&self.languages_server_to_client)?;
        buf.put_bool(self.first_kex_packet_follows)?;
        buf.put_u32(0)
    }

    fn decode(buf: &mut Buffer) -> Result<Self, WireError> {
        let mut cookie = [0u8; 16];
        cookie.copy_from_slice(&buf.get_bytes(16)?);

        let decoded = Self {
            cookie,
            kex_algorithms: buf.get_name_list()?,
            server_host_key_algorithms: buf.get_name_list()?,
            encryption_algorithms_client_to_server: buf.get_name_list()?,
            encryption_algorithms_server_to_client: buf.get_name_list()?,
            mac_algorithms_client_to_server: buf.get_name_list()?,
            mac_algorithms_server_to_client: buf.get_name_list()?,
            compression_algorithms_client_to_server: buf.get_name_list()?,
            compression_algorithms_server_to_client: buf.get_name_list()?,
            languages_client_to_server: buf.get_name_list()?,
            languages_server_to_client: buf.get_name_list()?,
            first_kex_packet_follows: buf.get_bool()?,
        };
        buf.get_u32()?; // reserved

        Ok(decoded)
    }
}

/// The `SSH_MSG_NEWKEYS` message.
#[derive(Debug, Default, Clone)]
pub struct NewKeys;

impl Wire for NewKeys {
    const ID: u8 = SSH_MSG_NEWKEYS;

    fn encode(&self, _buf: &mut Buffer) -> Result<(), WireError> {
        Ok(())
    }

    fn decode(_buf: &mut Buffer) -> Result<Self, WireError> {
        Ok(Self)
    }
}

/// The `SSH_MSG_KEXDH_INIT` message.
///
/// see <https://datatracker.ietf.org/doc/html/rfc4253#section-8>.
#[derive(Debug, Clone)]
pub struct KexDhInit {
    /// Exchange value sent by the client.
    pub e: MpInt,
}

impl Wire for KexDhInit {
    const ID: u8 = SSH_MSG_KEXDH_INIT;

    fn encode(&self, buf: &mut Buffer) -> Result<(), WireError> {
        buf.put_mpint(&self.e)
    }

    fn decode(buf: &mut Buffer) -> Result<Self, WireError> {
        Ok(Self {
            e: buf.get_mpint()?,
        })
    }
}

/// The `SSH_MSG_KEXDH_REPLY` message.
///
/// see <https://datatracker.ietf.org/doc/html/rfc4253#section-8>.
#[derive(Debug, Clone)]
pub struct KexDhReply {
    /// Server's public host key blob.
    pub k_s: Vec<u8>,

    /// Exchange value sent by the server.
    pub f: MpInt,

    /// Signature of the exchange hash.
    pub signature: Vec<u8>,
}

impl Wire for KexDhReply {
    const ID: u8 = SSH_MSG_KEXDH_REPLY;

    fn encode(&self, buf: &mut Buffer) -> Result<(), WireError> {
        buf.put_string(&self.k_s)?;
        buf.put_mpint(&self.f)?;
        buf.put_string(&self.signature)
    }

    fn decode(buf: &mut Buffer) -> Result<Self, WireError> {
        Ok(Self {
            k_s: buf.get_string()?,
            f: buf.get_mpint()?,
            signature: buf.get_string()?,
        })
    }
}

/// The `SSH_MSG_KEX_ECDH_INIT` message, shared by the ECDH, Curve25519 and
/// ML-KEM hybrid exchanges.
///
/// see <https://datatracker.ietf.org/doc/html/rfc5656#section-4>.
#[derive(Debug, Clone)]
pub struct KexEcdhInit {
    /// Client's ephemeral public key octet string.
    pub q_c: Vec<u8>,
}

impl Wire for KexEcdhInit {
    const ID: u8 = SSH_MSG_KEXDH_INIT;

    fn encode(&self, buf: &mut Buffer) -> Result<(), WireError> {
        buf.put_string(&self.q_c)
    }

    fn decode(buf: &mut Buffer) -> Result<Self, WireError> {
        Ok(Self {
            q_c: buf.get_string()?,
        })
    }
}

/// The `SSH_MSG_KEX_ECDH_REPLY` message.
///
/// see <https://datatracker.ietf.org/doc/html/rfc5656#section-4>.
#[derive(Debug, Clone)]
pub struct KexEcdhReply {
    /// Server's public host key blob.
    pub k_s: Vec<u8>,

    /// Server's ephemeral public key octet string.
    pub q_s: Vec<u8>,

    /// Signature of the exchange hash.
    pub signature: Vec<u8>,
}

impl Wire for KexEcdhReply {
    const ID: u8 = SSH_MSG_KEXDH_REPLY;

    fn encode(&self, buf: &mut Buffer) -> Result<(), WireError> {
        buf.put_string(&self.k_s)?;
        buf.put_string(&self.q_s)?;
        buf.put_string(&self.signature)
    }

    fn decode(buf: &mut Buffer) -> Result<Self, WireError> {
        Ok(Self {
            k_s: buf.get_string()?,
            q_s: buf.get_string()?,
            signature: buf.get_string()?,
        })
    }
}

/// The authentication method carried by an [`AuthRequest`].
#[derive(Debug, Clone)]
pub enum AuthMethod {
    /// The `none` method.
    None,

    /// The `password` method, optionally carrying a new password for a
    /// change request.
    Password {
        /// The presented password.
        password: String,

        /// The replacement password of a change request.
        new: Option<String>,
    },

    /// The `publickey` method; `signature` is absent in the query phase.
    Publickey {
        /// The signature algorithm name.
        algorithm: String,

        /// The public key blob.
        blob: Vec<u8>,

        /// The signature over the session identifier and request.
        signature: Option<Vec<u8>>,
    },
}

impl AuthMethod {
    /// The method name on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Password { .. } => "password",
            Self::Publickey { .. } => "publickey",
        }
    }
}

/// The `SSH_MSG_USERAUTH_REQUEST` message.
///
/// see <https://datatracker.ietf.org/doc/html/rfc4252#section-5>.
#[derive(Debug, Clone)]
pub struct AuthRequest {
    /// The username to authenticate as.
    pub username: String,

    /// The service to start after authentication.
    pub service_name: String,

    /// The authentication method and its payload.
    pub method: AuthMethod,
}

impl Wire for AuthRequest {
    const ID: u8 = SSH_MSG_USERAUTH_REQUEST;

    fn encode(&self, buf: &mut Buffer) -> Result<(), WireError> {
        buf.put_string(self.username.as_bytes())?;
        buf.put_string(self.service_name.as_bytes())?;
        buf.put_string(self.method.name().as_bytes())?;

        match &self.method {
            AuthMethod::None => Ok(()),
            AuthMethod::Password { password, new } => {
                buf.put_bool(new.is_some())?;
                buf.put_string(password.as_bytes())?;
                if let Some(new) = new {
                    buf.put_string(new.as_bytes())?;
                }

                Ok(())
            }
            AuthMethod::Publickey {
                algorithm,
                blob,
                signature,
            } => {
                buf.put_bool(signature.is_some())?;
                buf.put_string(algorithm.as_bytes())?;
                buf.put_string(blob)?;
                if let Some(signature) = signature {
                    buf.put_string(signature)?;
                }

                Ok(())
            }
        }
    }

    fn decode(buf: &mut Buffer) -> Result<Self, WireError> {
        let username = buf.get_string_utf8()?;
        let service_name = buf.get_string_utf8()?;
        let method_name = buf.get_string_utf8()?;

        let method = match method_name.as_str() {
            "none" => AuthMethod::None,
            "password" => {
                let change = buf.get_bool()?;
                let password = buf.get_string_utf8()?;
                let new = change.then(|| buf.get_string_utf8()).transpose()?;

                AuthMethod::Password { password, new }
            }
            "publickey" => {
                let signed = buf.get_bool()?;
                let algorithm = buf.get_string_utf8()?;
                let blob = buf.get_string()?;
                let signature = signed.then(|| buf.get_string()).transpose()?;

                AuthMethod::Publickey {
                    algorithm,
                    blob,
                    signature,
                }
            }
            _ => return Err(WireError::BadPacket),
        };

        Ok(Self {
            username,
            service_name,
            method,
        })
    }
}

/// The `SSH_MSG_USERAUTH_FAILURE` message.
#[derive(Debug, Clone)]
pub struct AuthFailure {
    /// Methods that may productively continue the exchange.
    pub continue_with: NameList,

    /// Whether the rejected request was itself successful.
    pub partial_success: bool,
}

impl Wire for AuthFailure {
    const ID: u8 = SSH_MSG_USERAUTH_FAILURE;

    fn encode(&self, buf: &mut Buffer) -> Result<(), WireError> {
        buf.put_name_list(&self.continue_with)?;
        buf.put_bool(self.partial_success)
    }

    fn decode(buf: &mut Buffer) -> Result<Self, WireError> {
        Ok(Self {
            continue_with: buf.get_name_list()?,
            partial_success: buf.get_bool()?,
        })
    }
}

/// The `SSH_MSG_USERAUTH_SUCCESS` message.
#[derive(Debug, Default, Clone)]
pub struct AuthSuccess;

impl Wire for AuthSuccess {
    const ID: u8 = SSH_MSG_USERAUTH_SUCCESS;

    fn encode(&self, _buf: &mut Buffer) -> Result<(), WireError> {
        Ok(())
    }

    fn decode(_buf: &mut Buffer) -> Result<Self, WireError> {
        Ok(Self)
    }
}

/// The `SSH_MSG_USERAUTH_BANNER` message.
#[derive(Debug, Default, Clone)]
pub struct AuthBanner {
    /// The banner text.
    pub message: String,

    /// Language tag.
    pub language: String,
}

impl Wire for AuthBanner {
    const ID: u8 = SSH_MSG_USERAUTH_BANNER;

    fn encode(&self, buf: &mut Buffer) -> Result<(), WireError> {
        buf.put_string(self.message.as_bytes())?;
        buf.put_string(self.language.as_bytes())
    }

    fn decode(buf: &mut Buffer) -> Result<Self, WireError> {
        Ok(Self {
            message: buf.get_string_utf8()?,
            language: buf.get_string_utf8()?,
        })
    }
}

/// The `SSH_MSG_USERAUTH_PK_OK` message, answering a public-key query.
#[derive(Debug, Clone)]
pub struct AuthPkOk {
    /// The echoed signature algorithm name.
    pub algorithm: String,

    /// The echoed public key blob.
    pub blob: Vec<u8>,
}

impl Wire for AuthPkOk {
    const ID: u8 = SSH_MSG_USERAUTH_PK_OK;

    fn encode(&self, buf: &mut Buffer) -> Result<(), WireError> {
        buf.put_string(self.algorithm.as_bytes())?;
        buf.put_string(&self.blob)
    }

    fn decode(buf: &mut Buffer) -> Result<Self, WireError> {
        Ok(Self {
            algorithm: buf.get_string_utf8()?,
            blob: buf.get_string()?,
        })
    }
}

/// The `SSH_MSG_GLOBAL_REQUEST` message.
///
/// see <https://datatracker.ietf.org/doc/html/rfc4254#section-4>.
#[derive(Debug, Clone)]
pub struct GlobalRequest {
    /// The request name.
    pub name: String,

    /// Whether the peer expects an explicit reply.
    pub want_reply: bool,

    /// Request-specific trailing data.
    pub data: Vec<u8>,
}

impl Wire for GlobalRequest {
    const ID: u8 = SSH_MSG_GLOBAL_REQUEST;

    fn encode(&self, buf: &mut Buffer) -> Result<(), WireError> {
        buf.put_string(self.name.as_bytes())?;
        buf.put_bool(self.want_reply)?;
        buf.put_bytes(&self.data)
    }

    fn decode(buf: &mut Buffer) -> Result<Self, WireError> {
        Ok(Self {
            name: buf.get_string_utf8()?,
            want_reply: buf.get_bool()?,
            data: buf.get_rest(),
        })
    }
}

/// The `SSH_MSG_REQUEST_SUCCESS` message.
#[derive(Debug, Default, Clone)]
pub struct RequestSuccess {
    /// Request-specific response data.
    pub data: Vec<u8>,
}

impl Wire for RequestSuccess {
    const ID: u8 = SSH_MSG_REQUEST_SUCCESS;

    fn encode(&self, buf: &mut Buffer) -> Result<(), WireError> {
        buf.put_bytes(&self.data)
    }

    fn decode(buf: &mut Buffer) -> Result<Self, WireError> {
        Ok(Self {
            data: buf.get_rest(),
        })
    }
}

/// The `SSH_MSG_REQUEST_FAILURE` message.
#[derive(Debug, Default, Clone)]
pub struct RequestFailure;

impl Wire for RequestFailure {
    const ID: u8 = SSH_MSG_REQUEST_FAILURE;

    fn encode(&self, _buf: &mut Buffer) -> Result<(), WireError> {
        Ok(())
    }

    fn decode(_buf: &mut Buffer) -> Result<Self, WireError> {
        Ok(Self)
    }
}

/// The `SSH_MSG_CHANNEL_OPEN` message.
///
/// see <https://datatracker.ietf.org/doc/html/rfc4254#section-5.1>.
#[derive(Debug, Clone)]
pub struct ChannelOpen {
    /// The channel type name.
    pub channel_type: String,

    /// Sender's local channel identifier.
    pub sender_channel: u32,

    /// Initial window granted to the peer.
    pub initial_window_size: u32,

    /// Maximum packet size accepted by the sender.
    pub maximum_packet_size: u32,

    /// Type-specific trailing data.
    pub data: Vec<u8>,
}

impl Wire for ChannelOpen {
    const ID: u8 = SSH_MSG_CHANNEL_OPEN;

    fn encode(&self, buf: &mut Buffer) -> Result<(), WireError> {
        buf.put_string(self.channel_type.as_bytes())?;
        buf.put_u32(self.sender_channel)?;
        buf.put_u32(self.initial_window_size)?;
        buf.put_u32(self.maximum_packet_size)?;
        buf.put_bytes(&self.data)
    }

    fn decode(buf: &mut Buffer) -> Result<Self, WireError> {
        Ok(Self {
            channel_type: buf.get_string_utf8()?,
            sender_channel: buf.get_u32()?,
            initial_window_size: buf.get_u32()?,
            maximum_packet_size: buf.get_u32()?,
            data: buf.get_rest(),
        })
    }
}

/// The `SSH_MSG_CHANNEL_OPEN_CONFIRMATION` message.
#[derive(Debug, Clone)]
pub struct ChannelOpenConfirmation {
    /// The recipient's channel identifier.
    pub recipient_channel: u32,

    /// The sender's channel identifier.
    pub sender_channel: u32,

    /// Initial window granted to the peer.
    pub initial_window_size: u32,

    /// Maximum packet size accepted by the sender.
    pub maximum_packet_size: u32,

    /// Type-specific trailing data.
    pub data: Vec<u8>,
}

impl Wire for ChannelOpenConfirmation {
    const ID: u8 = SSH_MSG_CHANNEL_OPEN_CONFIRMATION;

    fn encode(&self, buf: &mut Buffer) -> Result<(), WireError> {
        buf.put_u32(self.recipient_channel)?;
        buf.put_u32(self.sender_channel)?;
        buf.put_u32(self.initial_window_size)?;
        buf.put_u32(self.maximum_packet_size)?;
        buf.put_bytes(&self.data)
    }

    fn decode(buf: &mut Buffer) -> Result<Self, WireError> {
        Ok(Self {
            recipient_channel: buf.get_u32()?,
            sender_channel: buf.get_u32()?,
            initial_window_size: buf.get_u32()?,
            maximum_packet_size: buf.get_u32()?,
            data: buf.get_rest(),
        })
    }
}

/// The `reason` for rejection in a [`ChannelOpenFailure`] message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOpenFailureReason {
    /// `SSH_OPEN_ADMINISTRATIVELY_PROHIBITED`.
    AdministrativelyProhibited,

    /// `SSH_OPEN_CONNECT_FAILED`.
    ConnectFailed,

    /// `SSH_OPEN_UNKNOWN_CHANNEL_TYPE`.
    UnknownChannelType,

    /// `SSH_OPEN_RESOURCE_SHORTAGE`.
    ResourceShortage,

    /// Any other reason code, may be non-standard.
    Other(u32),
}

impl From<u32> for ChannelOpenFailureReason {
    fn from(code: u32) -> Self {
        match code {
            1 => Self::AdministrativelyProhibited,
            2 => Self::ConnectFailed,
            3 => Self::UnknownChannelType,
            4 => Self::ResourceShortage,
            other => Self::Other(other),
        }
    }
}

impl From<ChannelOpenFailureReason> for u32 {
    fn from(reason: ChannelOpenFailureReason) -> Self {
        match reason {
            ChannelOpenFailureReason::AdministrativelyProhibited => 1,
            ChannelOpenFailureReason::ConnectFailed => 2,
            ChannelOpenFailureReason::UnknownChannelType => 3,
            ChannelOpenFailureReason::ResourceShortage => 4,
            ChannelOpenFailureReason::Other(code) => code,
        }
    }
}

/// The `SSH_MSG_CHANNEL_OPEN_FAILURE` message.
#[derive(Debug, Clone)]
pub struct ChannelOpenFailure {
    /// The recipient's channel identifier.
    pub recipient_channel: u32,

    /// The reason for rejection.
    pub reason: ChannelOpenFailureReason,

    /// A textual description of the reason.
    pub description: String,

    /// Language tag.
    pub language: String,
}

impl Wire for ChannelOpenFailure {
    const ID: u8 = SSH_MSG_CHANNEL_OPEN_FAILURE;

    fn encode(&self, buf: &mut Buffer) -> Result<(), WireError> {
        buf.put_u32(self.recipient_channel)?;
        buf.put_u32(self.reason.into())?;
        buf.put_string(self.description.as_bytes())?;
        buf.put_string(self.language.as_bytes())
    }

    fn decode(buf: &mut Buffer) -> Result<Self, WireError> {
        Ok(Self {
            recipient_channel: buf.get_u32()?,
            reason: buf.get_u32()?.into(),
            description: buf.get_string_utf8()?,
            language: buf.get_string_utf8()?,
        })
    }
}

/// The `SSH_MSG_CHANNEL_WINDOW_ADJUST` message.
#[derive(Debug, Clone)]
pub struct ChannelWindowAdjust {
    /// The recipient's channel identifier.
    pub recipient_channel: u32,

    /// Window credit granted to the recipient, in bytes.
    pub bytes_to_add: u32,
}

impl Wire for ChannelWindowAdjust {
    const ID: u8 = SSH_MSG_CHANNEL_WINDOW_ADJUST;

    fn encode(&self, buf: &mut Buffer) -> Result<(), WireError> {
        buf.put_u32(self.recipient_channel)?;
        buf.put_u32(self.bytes_to_add)
    }

    fn decode(buf: &mut Buffer) -> Result<Self, WireError> {
        Ok(Self {
            recipient_channel: buf.get_u32()?,
            bytes_to_add: buf.get_u32()?,
        })
    }
}

/// The `SSH_MSG_CHANNEL_DATA` message.
#[derive(Debug, Clone)]
pub struct ChannelData {
    /// The recipient's channel identifier.
    pub recipient_channel: u32,

    /// The data bytes.
    pub data: Vec<u8>,
}

impl Wire for ChannelData {
    const ID: u8 = SSH_MSG_CHANNEL_DATA;

    fn encode(&self, buf: &mut Buffer) -> Result<(), WireError> {
        buf.put_u32(self.recipient_channel)?;
        buf.put_string(&self.data)
    }

    fn decode(buf: &mut Buffer) -> Result<Self, WireError> {
        Ok(Self {
            recipient_channel: buf.get_u32()?,
            data: buf.get_string()?,
        })
    }
}

/// The type code for stderr in [`ChannelExtendedData`].
pub const SSH_EXTENDED_DATA_STDERR: u32 = 1;

/// The `SSH_MSG_CHANNEL_EXTENDED_DATA` message.
#[derive(Debug, Clone)]
pub struct ChannelExtendedData {
    /// The recipient's channel identifier.
    pub recipient_channel: u32,

    /// The extended data type code.
    pub data_type: u32,

    /// The data bytes.
    pub data: Vec<u8>,
}

impl Wire for ChannelExtendedData {
    const ID: u8 = SSH_MSG_CHANNEL_EXTENDED_DATA;

    fn encode(&self, buf: &mut Buffer) -> Result<(), WireError> {
        buf.put_u32(self.recipient_channel)?;
        buf.put_u32(self.data_type)?;
        buf.put_string(&self.data)
    }

    fn decode(buf: &mut Buffer) -> Result<Self, WireError> {
        Ok(Self {
            recipient_channel: buf.get_u32()?,
            data_type: buf.get_u32()?,
            data: buf.get_string()?,
        })
    }
}

/// The `SSH_MSG_CHANNEL_EOF` message.
#[derive(Debug, Clone)]
pub struct ChannelEof {
    /// The recipient's channel identifier.
    pub recipient_channel: u32,
}

impl Wire for ChannelEof {
    const ID: u8 = SSH_MSG_CHANNEL_EOF;

    fn encode(&self, buf: &mut Buffer) -> Result<(), WireError> {
        buf.put_u32(self.recipient_channel)
    }

    fn decode(buf: &mut Buffer) -> Result<Self, WireError> {
        Ok(Self {
            recipient_channel: buf.get_u32()?,
        })
    }
}

/// The `SSH_MSG_CHANNEL_CLOSE` message.
#[derive(Debug, Clone)]
pub struct ChannelClose {
    /// The recipient's channel identifier.
    pub recipient_channel: u32,
}

impl Wire for ChannelClose {
    const ID: u8 = SSH_MSG_CHANNEL_CLOSE;

    fn encode(&self, buf: &mut Buffer) -> Result<(), WireError> {
        buf.put_u32(self.recipient_channel)
    }

    fn decode(buf: &mut Buffer) -> Result<Self, WireError> {
        Ok(Self {
            recipient_channel: buf.get_u32()?,
        })
    }
}

/// The `SSH_MSG_CHANNEL_REQUEST` message.
///
/// see <https://datatracker.ietf.org/doc/html/rfc4254#section-5.4>.
#[derive(Debug, Clone)]
pub struct ChannelRequest {
    /// The recipient's channel identifier.
    pub recipient_channel: u32,

    /// The request type name.
    pub request_type: String,

    /// Whether the peer expects an explicit reply.
    pub want_reply: bool,

    /// Request-specific trailing data.
    pub data: Vec<u8>,
}

impl Wire for ChannelRequest {
    const ID: u8 = SSH_MSG_CHANNEL_REQUEST;

    fn encode(&self, buf: &mut Buffer) -> Result<(), WireError> {
        buf.put_u32(self.recipient_channel)?;
        buf.put_string(self.request_type.as_bytes())?;
        buf.put_bool(self.want_reply)?;
        buf.put_bytes(&self.data)
    }

    fn decode(buf: &mut Buffer) -> Result<Self, WireError> {
        Ok(Self {
            recipient_channel: buf.get_u32()?,
            request_type: buf.get_string_utf8()?,
            want_reply: buf.get_bool()?,
            data: buf.get_rest(),
        })
    }
}

/// The `SSH_MSG_CHANNEL_SUCCESS` message.
#[derive(Debug, Clone)]
pub struct ChannelSuccess {
    /// The recipient's channel identifier.
    pub recipient_channel: u32,
}

impl Wire for ChannelSuccess {
    const ID: u8 = SSH_MSG_CHANNEL_SUCCESS;

    fn encode(&self, buf: &mut Buffer) -> Result<(), WireError> {
        buf.put_u32(self.recipient_channel)
    }

    fn decode(buf: &mut Buffer) -> Result<Self, WireError> {
        Ok(Self {
            recipient_channel: buf.get_u32()?,
        })
    }
}

/// The `SSH_MSG_CHANNEL_FAILURE` message.
#[derive(Debug, Clone)]
pub struct ChannelFailure {
    /// The recipient's channel identifier.
    pub recipient_channel: u32,
}

impl Wire for ChannelFailure {
    const ID: u8 = SSH_MSG_CHANNEL_FAILURE;

    fn encode(&self, buf: &mut Buffer) -> Result<(), WireError> {
        buf.put_u32(self.recipient_channel)
    }

    fn decode(buf: &mut Buffer) -> Result<Self, WireError> {
        Ok(Self {
            recipient_channel: buf.get_u32()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{IntoPacket, NameList};

    #[test]
    fn kexinit_roundtrip() {
        let kexinit = KexInit {
            cookie: [7u8; 16],
            kex_algorithms: ["curve25519-sha256", "kexguess2@matt.ucc.asn.au"]
                .into_iter()
                .collect(),
            server_host_key_algorithms: ["ssh-ed25519"].into_iter().collect(),
            encryption_algorithms_client_to_server: ["aes128-ctr"].into_iter().collect(),
            encryption_algorithms_server_to_client: ["aes128-ctr"].into_iter().collect(),
            mac_algorithms_client_to_server: ["hmac-sha2-256"].into_iter().collect(),
            mac_algorithms_server_to_client: ["hmac-sha2-256"].into_iter().collect(),
            compression_algorithms_client_to_server: ["none"].into_iter().collect(),
            compression_algorithms_server_to_client: ["none"].into_iter().collect(),
            languages_client_to_server: NameList::default(),
            languages_server_to_client: NameList::default(),
            first_kex_packet_follows: false,
        };

        let packet = (&kexinit).into_packet().expect("encodable");
        assert_eq!(packet.message_id(), SSH_MSG_KEXINIT);

        let decoded: KexInit = packet.to().expect("decodable");
        assert_eq!(decoded.cookie, kexinit.cookie);
        assert_eq!(decoded.kex_algorithms, kexinit.kex_algorithms);
        assert!(!decoded.first_kex_packet_follows);
    }

    #[test]
    fn auth_request_methods_roundtrip() {
        for method in [
            AuthMethod::None,
            AuthMethod::Password {
                password: "hunter2".into(),
                new: None,
            },
            AuthMethod::Publickey {
                algorithm: "ssh-ed25519".into(),
                blob: vec![1, 2, 3],
                signature: Some(vec![4, 5, 6]),
            },
        ] {
            let request = AuthRequest {
                username: "user".into(),
                service_name: "ssh-connection".into(),
                method,
            };

            let packet = (&request).into_packet().expect("encodable");
            let decoded: AuthRequest = packet.to().expect("decodable");

            assert_eq!(decoded.username, request.username);
            assert_eq!(decoded.method.name(), request.method.name());
        }
    }

    #[test]
    fn trailing_data_is_raw() {
        let open = ChannelOpen {
            channel_type: "session".into(),
            sender_channel: 3,
            initial_window_size: 1024,
            maximum_packet_size: 256,
            data: vec![0xca, 0xfe],
        };

        let packet = (&open).into_packet().expect("encodable");
        let decoded: ChannelOpen = packet.to().expect("decodable");

        assert_eq!(decoded.data, open.data);
        assert_eq!(decoded.maximum_packet_size, 256);
    }

    #[test]
    fn wrong_id_is_rejected() {
        let packet = (&NewKeys).into_packet().expect("encodable");
        assert!(packet.to::<KexInit>().is_err());
    }
}
