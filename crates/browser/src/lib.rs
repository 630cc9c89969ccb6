pub mod cdp;
pub mod session;

pub use cdp::CdpClient;
pub use session::{find_browser_binary, BrowserSession};
