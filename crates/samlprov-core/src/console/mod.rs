//! Emulated browser workflow against the admin console.
//!
//! Push provisioning has no REST equivalent, so it is configured the way an
//! administrator's browser would do it: authenticate, trade the session token
//! for cookies, pick up the SSO exchange token from the org landing page,
//! trade that for an admin session (whose dashboard carries the xsrf token),
//! then post the settings form.

pub mod extract;
pub mod session;
pub mod settings;

pub use extract::{MarkupTokenLocator, SsoToken, TokenLocator, XsrfToken};
pub use session::{ConsoleSession, SessionToken};
pub use settings::ProvisioningForm;
