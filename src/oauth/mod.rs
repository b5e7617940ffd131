//! OAuth round trip: state sealing, PKCE, authorization URLs, token grants
//! and the connect/callback service tying them to the credential store.

pub mod authorize;
pub mod exchange;
pub mod flow;
pub mod pkce;
pub mod state;

pub use exchange::{OAuthTokenClient, TokenExchanger, TokenGrant};
pub use flow::{AuthorizationRedirect, ConnectionEstablished, ConnectionStatus, OAuthFlowService};
pub use state::{OAuthFlowContext, StateCodec};
