//! TwiML documents

/// `<Connect><Stream>` document that bridges a call onto a media-stream socket
///
/// Parameters arrive on the socket in the `start` message's
/// `customParameters`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectStream {
    url: String,
    parameters: Vec<(String, String)>,
}

impl ConnectStream {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            parameters: Vec::new(),
        }
    }

    pub fn parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.push((name.into(), value.into()));
        self
    }

    pub fn render(&self) -> String {
        let mut xml = String::from(r#"<?xml version="1.0" encoding="UTF-8"?><Response><Connect>"#);
        xml.push_str(&format!(r#"<Stream url="{}">"#, escape(&self.url)));
        for (name, value) in &self.parameters {
            xml.push_str(&format!(
                r#"<Parameter name="{}" value="{}"/>"#,
                escape(name),
                escape(value)
            ));
        }
        xml.push_str("</Stream></Connect></Response>");
        xml
    }
}

/// Spoken refusal followed by a hangup
pub fn say_and_hangup(message: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><Response><Say>{}</Say><Hangup/></Response>"#,
        escape(message)
    )
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_stream_document() {
        let xml = ConnectStream::new("wss://gw.example/media-stream")
            .parameter("call_id", "c1")
            .parameter("note", "a&b \"quoted\"")
            .render();

        assert_eq!(
            xml,
            concat!(
                r#"<?xml version="1.0" encoding="UTF-8"?><Response><Connect>"#,
                r#"<Stream url="wss://gw.example/media-stream">"#,
                r#"<Parameter name="call_id" value="c1"/>"#,
                r#"<Parameter name="note" value="a&amp;b &quot;quoted&quot;"/>"#,
                "</Stream></Connect></Response>"
            )
        );
    }

    #[test]
    fn test_refusal_document() {
        let xml = say_and_hangup("Sorry <nobody> is here");
        assert!(xml.contains("<Say>Sorry &lt;nobody&gt; is here</Say><Hangup/>"));
    }
}
