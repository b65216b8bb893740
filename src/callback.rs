//! Local HTTP callback server for the hubiC OAuth2 redirect.
//!
//! Binds `127.0.0.1:18181`, waits for the single GET request the browser
//! makes after the user approves access, extracts the `code`/`state` query
//! parameters, serves a short confirmation page, then shuts down. The port
//! is fixed because it is baked into the hubiC application's registered
//! redirect URI.

use std::io::{Read, Write};
use std::net::TcpListener;

use url::Url;

use crate::error::{RemoteError, Result};

pub const CALLBACK_PORT: u16 = 18181;

pub fn redirect_uri() -> String {
    format!("http://localhost:{CALLBACK_PORT}/")
}

pub struct CallbackParams {
    pub code: String,
    pub state: Option<String>,
}

const SUCCESS_HTML: &str = "<html><head><title>git-annex-remote-hubic authentication</title></head>\
<body><p>Authentication completed, you can now close this window.</p></body></html>";

/// Wait for the single OAuth redirect request and extract its parameters.
pub fn wait_for_callback() -> Result<CallbackParams> {
    let listener = TcpListener::bind(("127.0.0.1", CALLBACK_PORT))
        .map_err(|e| RemoteError::Auth(format!("failed to bind callback port: {e}")))?;

    let (mut stream, _) = listener
        .accept()
        .map_err(|e| RemoteError::Auth(format!("failed to accept callback connection: {e}")))?;

    let mut buf = [0u8; 4096];
    let n = stream
        .read(&mut buf)
        .map_err(|e| RemoteError::Auth(format!("failed to read callback request: {e}")))?;
    let request = String::from_utf8_lossy(&buf[..n]);

    let first_line = request
        .lines()
        .next()
        .ok_or_else(|| RemoteError::Auth("empty callback request".to_string()))?;
    let path = first_line
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| RemoteError::Auth("malformed callback request line".to_string()))?;

    let full_url = format!("http://localhost:{CALLBACK_PORT}{path}");
    let url = Url::parse(&full_url)
        .map_err(|e| RemoteError::Auth(format!("failed to parse callback URL: {e}")))?;

    let code = url
        .query_pairs()
        .find(|(k, _)| k == "code")
        .map(|(_, v)| v.to_string());
    let state = url
        .query_pairs()
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v.to_string());

    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        SUCCESS_HTML.len(),
        SUCCESS_HTML
    );
    let _ = stream.write_all(response.as_bytes());
    let _ = stream.flush();

    let code = code.ok_or_else(|| {
        RemoteError::Auth(
            "something went wrong during authentication: the request code is missing".to_string(),
        )
    })?;

    Ok(CallbackParams { code, state })
}

/// Open `url` in the default browser, with the launched process's
/// stdout/stderr suppressed. Some platforms' browser launchers (notably
/// `xdg-open` wrappers) print to the calling process's standard streams,
/// which here is the host protocol pipe — `suppress_output` keeps that
/// chatter off of it.
pub fn open_in_browser(url: &str) -> Result<()> {
    let options = webbrowser::BrowserOptions::new().with_suppress_output(true);
    webbrowser::open_browser_with_options(webbrowser::Browser::Default, url, &options)
        .map_err(|e| RemoteError::Auth(format!("failed to open browser: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpStream;

    #[test]
    fn extracts_code_and_state() {
        let handle = std::thread::spawn(wait_for_callback);
        std::thread::sleep(std::time::Duration::from_millis(100));

        let mut client = TcpStream::connect(("127.0.0.1", CALLBACK_PORT)).unwrap();
        let request =
            "GET /?code=abc123&state=xyz HTTP/1.1\r\nHost: localhost\r\n\r\n";
        client.write_all(request.as_bytes()).unwrap();
        let mut response = Vec::new();
        let _ = client.read_to_end(&mut response);

        let params = handle.join().unwrap().unwrap();
        assert_eq!(params.code, "abc123");
        assert_eq!(params.state.as_deref(), Some("xyz"));
    }
}
