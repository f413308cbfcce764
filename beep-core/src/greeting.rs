//! Channel-zero XML: a hand-rolled reader/writer for the small, fixed
//! element set BEEP management uses. Not a general XML parser — anything
//! outside `<greeting>`, `<start>`, `<profile>`, `<close>`, `<ok/>`, and
//! `<error>` is a protocol error, not silently ignored.

use std::collections::HashMap;

use crate::error::ProtocolError;

/// A parsed channel-zero message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagementMessage {
    Greeting {
        profiles: Vec<String>,
    },
    Start {
        channel: u32,
        profiles: Vec<ProfileOffer>,
    },
    Close {
        channel: u32,
        code: u16,
        diagnostic: Option<String>,
    },
    Ok,
    Error {
        code: u16,
        diagnostic: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileOffer {
    pub uri: String,
    pub piggyback: Option<String>,
}

fn bad(reason: impl Into<String>) -> ProtocolError {
    ProtocolError::BadGreeting(reason.into())
}

/// One opening (or self-closing) tag, with the byte offset in the slice it
/// was parsed from just past the matching close tag.
struct Element {
    name: String,
    attrs: HashMap<String, String>,
    self_closing: bool,
    inner_text: String,
    end: usize,
}

/// Parse the next element out of `xml`, skipping leading whitespace.
/// `end` is relative to the original (untrimmed) `xml` passed in.
fn next_element(xml: &str) -> Option<Element> {
    let skip = xml.len() - xml.trim_start().len();
    let body = xml.trim_start();
    if !body.starts_with('<') {
        return None;
    }
    let tag_close = body.find('>')?;
    let mut head = body[1..tag_close].trim();
    let self_closing = head.ends_with('/');
    if self_closing {
        head = head[..head.len() - 1].trim_end();
    }

    let name_end = head.find(char::is_whitespace).unwrap_or(head.len());
    let name = head[..name_end].to_string();
    let attrs = parse_attrs(&head[name_end..]);

    if self_closing {
        return Some(Element {
            name,
            attrs,
            self_closing: true,
            inner_text: String::new(),
            end: skip + tag_close + 1,
        });
    }

    let after_open = &body[tag_close + 1..];
    let close_tag = format!("</{name}>");
    let close_at = after_open.find(&close_tag)?;
    Some(Element {
        name,
        attrs,
        self_closing: false,
        inner_text: after_open[..close_at].to_string(),
        end: skip + tag_close + 1 + close_at + close_tag.len(),
    })
}

fn parse_attrs(s: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    let mut rest = s;
    loop {
        let rest_trimmed = rest.trim_start();
        let Some(eq) = rest_trimmed.find('=') else { break };
        let key = rest_trimmed[..eq].trim();
        if key.is_empty() {
            break;
        }
        let after_eq = &rest_trimmed[eq + 1..];
        let Some(quote) = after_eq.chars().next().filter(|c| *c == '\'' || *c == '"') else {
            break;
        };
        let after_quote = &after_eq[1..];
        let Some(value_end) = after_quote.find(quote) else {
            break;
        };
        out.insert(key.to_string(), after_quote[..value_end].to_string());
        rest = &after_quote[value_end + 1..];
    }
    out
}

/// Parse one channel-zero message from its XML body.
pub fn parse(xml: &str) -> Result<ManagementMessage, ProtocolError> {
    let el = next_element(xml).ok_or_else(|| bad("no element found"))?;
    match el.name.as_str() {
        "greeting" => parse_greeting(el),
        "start" => parse_start(el),
        "close" => parse_close(el),
        "ok" => Ok(ManagementMessage::Ok),
        "error" => parse_error(el),
        other => Err(bad(format!("unexpected element <{other}>"))),
    }
}

fn parse_profile_children(body: &str) -> Result<Vec<Element>, ProtocolError> {
    let mut profiles = Vec::new();
    let mut rest = body;
    while !rest.trim_start().is_empty() {
        let el = next_element(rest).ok_or_else(|| bad("malformed child element"))?;
        if el.name != "profile" {
            return Err(bad(format!("unexpected child <{}>, expected <profile>", el.name)));
        }
        let consumed = el.end;
        profiles.push(el);
        rest = &rest[consumed..];
    }
    Ok(profiles)
}

fn parse_greeting(el: Element) -> Result<ManagementMessage, ProtocolError> {
    if el.self_closing {
        return Ok(ManagementMessage::Greeting { profiles: Vec::new() });
    }
    let children = parse_profile_children(&el.inner_text)?;
    let mut profiles = Vec::new();
    for child in children {
        let uri = child
            .attrs
            .get("uri")
            .ok_or_else(|| bad("profile missing uri attribute"))?
            .clone();
        profiles.push(uri);
    }
    Ok(ManagementMessage::Greeting { profiles })
}

fn parse_start(el: Element) -> Result<ManagementMessage, ProtocolError> {
    let channel = parse_u32_attr(&el, "number")?;
    if el.self_closing {
        return Err(bad("start must offer at least one profile"));
    }
    let children = parse_profile_children(&el.inner_text)?;
    if children.is_empty() {
        return Err(bad("start must offer at least one profile"));
    }
    let mut profiles = Vec::new();
    for child in children {
        let uri = child
            .attrs
            .get("uri")
            .ok_or_else(|| bad("profile missing uri attribute"))?
            .clone();
        let piggyback = if child.self_closing || child.inner_text.is_empty() {
            None
        } else {
            Some(child.inner_text.clone())
        };
        profiles.push(ProfileOffer { uri, piggyback });
    }
    Ok(ManagementMessage::Start { channel, profiles })
}

fn parse_close(el: Element) -> Result<ManagementMessage, ProtocolError> {
    let channel = parse_u32_attr(&el, "number")?;
    let code = parse_u16_attr(&el, "code")?;
    let diagnostic = if el.inner_text.trim().is_empty() {
        None
    } else {
        Some(el.inner_text.trim().to_string())
    };
    Ok(ManagementMessage::Close { channel, code, diagnostic })
}

fn parse_error(el: Element) -> Result<ManagementMessage, ProtocolError> {
    let code = parse_u16_attr(&el, "code")?;
    Ok(ManagementMessage::Error {
        code,
        diagnostic: el.inner_text.trim().to_string(),
    })
}

fn parse_u32_attr(el: &Element, name: &str) -> Result<u32, ProtocolError> {
    el.attrs
        .get(name)
        .ok_or_else(|| bad(format!("{} missing {name} attribute", el.name)))?
        .parse()
        .map_err(|_| bad(format!("{name} attribute not numeric")))
}

fn parse_u16_attr(el: &Element, name: &str) -> Result<u16, ProtocolError> {
    el.attrs
        .get(name)
        .ok_or_else(|| bad(format!("{} missing {name} attribute", el.name)))?
        .parse()
        .map_err(|_| bad(format!("{name} attribute not numeric")))
}

/// Serialize a message back to its channel-zero XML body.
pub fn emit(msg: &ManagementMessage) -> String {
    match msg {
        ManagementMessage::Greeting { profiles } => {
            if profiles.is_empty() {
                "<greeting />".to_string()
            } else {
                let mut s = String::from("<greeting>\r\n");
                for uri in profiles {
                    s.push_str(&format!("   <profile uri='{uri}' />\r\n"));
                }
                s.push_str("</greeting>");
                s
            }
        }
        ManagementMessage::Start { channel, profiles } => {
            let mut s = format!("<start number='{channel}'>\r\n");
            for p in profiles {
                match &p.piggyback {
                    Some(data) => s.push_str(&format!("   <profile uri='{}'>{}</profile>\r\n", p.uri, data)),
                    None => s.push_str(&format!("   <profile uri='{}' />\r\n", p.uri)),
                }
            }
            s.push_str("</start>");
            s
        }
        ManagementMessage::Close { channel, code, diagnostic } => match diagnostic {
            Some(d) => format!("<close number='{channel}' code='{code}'>{d}</close>"),
            None => format!("<close number='{channel}' code='{code}' />"),
        },
        ManagementMessage::Ok => "<ok />".to_string(),
        ManagementMessage::Error { code, diagnostic } => {
            format!("<error code='{code}'>{diagnostic}</error>")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_greeting_with_profiles() {
        let xml = "<greeting>\r\n   <profile uri='http://a' />\r\n   <profile uri='http://b' />\r\n</greeting>";
        let msg = parse(xml).unwrap();
        assert_eq!(
            msg,
            ManagementMessage::Greeting {
                profiles: vec!["http://a".into(), "http://b".into()]
            }
        );
    }

    #[test]
    fn parses_empty_greeting() {
        let msg = parse("<greeting />").unwrap();
        assert_eq!(msg, ManagementMessage::Greeting { profiles: vec![] });
    }

    #[test]
    fn parses_start_with_single_profile() {
        let xml = "<start number='1'>\r\n   <profile uri='http://echo' />\r\n</start>";
        let msg = parse(xml).unwrap();
        match msg {
            ManagementMessage::Start { channel, profiles } => {
                assert_eq!(channel, 1);
                assert_eq!(profiles.len(), 1);
                assert_eq!(profiles[0].uri, "http://echo");
                assert_eq!(profiles[0].piggyback, None);
            }
            _ => panic!("expected Start"),
        }
    }

    #[test]
    fn parses_start_with_multiple_profiles_and_piggyback() {
        let xml = "<start number='3'>\r\n   <profile uri='http://a' />\r\n   <profile uri='http://b'>hi</profile>\r\n</start>";
        let msg = parse(xml).unwrap();
        match msg {
            ManagementMessage::Start { channel, profiles } => {
                assert_eq!(channel, 3);
                assert_eq!(profiles.len(), 2);
                assert_eq!(profiles[1].piggyback.as_deref(), Some("hi"));
            }
            _ => panic!("expected Start"),
        }
    }

    #[test]
    fn start_without_profiles_is_rejected() {
        assert!(parse("<start number='1' />").is_err());
    }

    #[test]
    fn parses_close() {
        let xml = "<close number='1' code='200' />";
        let msg = parse(xml).unwrap();
        assert_eq!(
            msg,
            ManagementMessage::Close {
                channel: 1,
                code: 200,
                diagnostic: None
            }
        );
    }

    #[test]
    fn parses_ok() {
        assert_eq!(parse("<ok />").unwrap(), ManagementMessage::Ok);
    }

    #[test]
    fn parses_error_with_diagnostic() {
        let msg = parse("<error code='550'>still working</error>").unwrap();
        assert_eq!(
            msg,
            ManagementMessage::Error {
                code: 550,
                diagnostic: "still working".into()
            }
        );
    }

    #[test]
    fn rejects_unknown_element() {
        assert!(parse("<bogus />").is_err());
    }

    #[test]
    fn emit_then_parse_roundtrips_greeting() {
        let msg = ManagementMessage::Greeting {
            profiles: vec!["http://x".into()],
        };
        let xml = emit(&msg);
        assert_eq!(parse(&xml).unwrap(), msg);
    }

    #[test]
    fn emit_then_parse_roundtrips_close_with_diagnostic() {
        let msg = ManagementMessage::Close {
            channel: 2,
            code: 200,
            diagnostic: Some("bye".into()),
        };
        let xml = emit(&msg);
        assert_eq!(parse(&xml).unwrap(), msg);
    }

    #[test]
    fn emit_then_parse_roundtrips_start_with_two_profiles() {
        let msg = ManagementMessage::Start {
            channel: 5,
            profiles: vec![
                ProfileOffer { uri: "http://a".into(), piggyback: None },
                ProfileOffer { uri: "http://b".into(), piggyback: Some("data".into()) },
            ],
        };
        let xml = emit(&msg);
        assert_eq!(parse(&xml).unwrap(), msg);
    }
}
