//! Live preview channel between the server and open pages.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Messages sent to connected pages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LiveMessage {
    /// Replace the rendered content
    Render {
        /// Content markup without the page shell
        html: String,
    },

    /// Full page reload
    Reload,

    /// Connection established
    Connected,
}

/// Hub for broadcasting live messages to all connected pages.
#[derive(Debug, Clone)]
pub struct LiveHub {
    sender: broadcast::Sender<LiveMessage>,
}

impl LiveHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(100);
        Self { sender }
    }

    /// Send a message to all connected pages.
    pub fn send(&self, msg: LiveMessage) {
        // No receivers is fine
        let _ = self.sender.send(msg);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LiveMessage> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for LiveHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Client script for a preview page.
///
/// Connects to `ws_path` on the serving host, applies `render` and `reload`
/// messages, and forwards editor messages posted to the window by a trusted
/// editor host (`*.example.com` patterns match subdomains).
pub fn live_client_script(ws_path: &str, trusted_hosts: &[String]) -> String {
    let hosts = serde_json::to_string(trusted_hosts).unwrap_or_else(|_| "[]".to_string());
    format!(
        r#"
(function() {{
  'use strict';

  var trustedHosts = {hosts};
  var protocol = location.protocol === 'https:' ? 'wss:' : 'ws:';
  var ws = new WebSocket(protocol + '//' + location.host + '{ws_path}');
  var reconnectAttempts = 0;
  var maxReconnectAttempts = 10;

  function isTrusted(origin) {{
    var host;
    try {{ host = new URL(origin).hostname.toLowerCase(); }} catch (e) {{ return false; }}
    return trustedHosts.some(function(pattern) {{
      pattern = pattern.toLowerCase();
      if (pattern.indexOf('*.') === 0) return host.endsWith(pattern.slice(1));
      return host === pattern;
    }});
  }}

  ws.onopen = function() {{
    reconnectAttempts = 0;
  }};

  ws.onmessage = function(event) {{
    var msg = JSON.parse(event.data);

    switch (msg.type) {{
      case 'render':
        var main = document.querySelector('main.trellis-content');
        if (main) {{
          main.innerHTML = msg.html;
        }} else {{
          location.reload();
        }}
        break;

      case 'reload':
        location.reload();
        break;

      case 'connected':
        console.log('[trellis] Live preview connected');
        break;
    }}
  }};

  window.addEventListener('message', function(event) {{
    var data = event.data;
    if (!data || typeof data.type !== 'string' || data.type.indexOf('builder.') !== 0) return;
    if (!isTrusted(event.origin) || ws.readyState !== WebSocket.OPEN) return;
    ws.send(JSON.stringify(data));
  }});

  ws.onclose = function() {{
    if (reconnectAttempts < maxReconnectAttempts) {{
      reconnectAttempts++;
      setTimeout(function() {{
        location.reload();
      }}, 1000 * reconnectAttempts);
    }}
  }};
}})();
"#
    )
}
