//! Open tracking pixel for HTML bodies.

use crate::{escape_attribute, extract::rfind_ascii_ci, open_url, TrackDomain};

/// Inline style of the pixel wrapper, hidden and without any layout footprint.
const PIXEL_STYLE: &str = "display:none;visibility:none;margin:0;padding:0;line-height:0;";

/// Builds and inserts the open tracking pixel of a message.
#[derive(Debug, Clone)]
pub struct PixelInjector {
    fragment: String,
}

impl PixelInjector {
    /// Creates the injector for a message, `None` when no valid open
    /// tracking URL can be built for it.
    pub fn new(track_domain: &TrackDomain, server: &str, token: &str) -> Option<Self> {
        let url = open_url(track_domain, server, token)?;
        let fragment = format!(
            "<p class='ampimg' style='{PIXEL_STYLE}'><img src='{}' alt=''></p>",
            escape_attribute(url.as_str())
        );
        Some(Self { fragment })
    }

    /// Returns the markup inserted into the document.
    pub fn fragment(&self) -> &str {
        &self.fragment
    }

    /// Inserts the pixel right before the last `</body>` of `html`, or at
    /// the very end when there is none.
    pub fn inject(&self, html: &str) -> String {
        let mut output = String::with_capacity(html.len() + self.fragment.len());
        match rfind_ascii_ci(html, "</body>") {
            Some(index) => {
                output.push_str(&html[..index]);
                output.push_str(&self.fragment);
                output.push_str(&html[index..]);
            }
            None => {
                output.push_str(html);
                output.push_str(&self.fragment);
            }
        }
        output
    }
}
