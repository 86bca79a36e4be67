//! rove-browser: the browser seam of the pipeline.
//!
//! [`BrowserDriver`] is the closed set of browser operations the pipeline
//! needs (navigation, frame enumeration, capture, screenshots and the page
//! primitives exposed to generated scripts). [`ChromeDriver`] implements it
//! over WebDriver; [`mock::MockBrowser`] implements it for tests.
//! [`ContextScanner`] picks the rendering surface that holds the content.

pub mod chrome;
pub mod driver;
pub mod mock;
pub mod scanner;
pub mod scripts;

pub use chrome::ChromeDriver;
pub use driver::{BrowserDriver, FrameHandle, FrameInfo, Rect};
pub use scanner::{ContextCandidate, ContextScanner, ScanResult, ScanThresholds};
