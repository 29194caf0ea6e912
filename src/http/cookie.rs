//! `Cookie` and `Set-Cookie` header parsing.

use chrono::{DateTime, NaiveDateTime, Utc};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub path: String,
    pub domain: String,
    pub expires: Option<DateTime<Utc>>,
    pub http_only: bool,
    pub secure: bool,
}

/// Parse every `name=value` pair of a request `Cookie` header.
pub fn parse_cookie_header(value: &str) -> Vec<Cookie> {
    value
        .split(';')
        .filter_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some(Cookie {
                name: name.to_string(),
                value: unquote(value.trim()).to_string(),
                ..Default::default()
            })
        })
        .collect()
}

/// Parse one response `Set-Cookie` header.
pub fn parse_set_cookie(value: &str) -> Option<Cookie> {
    let mut parts = value.split(';');
    let (name, val) = parts.next()?.trim().split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    let mut cookie = Cookie {
        name: name.to_string(),
        value: unquote(val.trim()).to_string(),
        ..Default::default()
    };

    for attr in parts {
        let (key, val) = match attr.split_once('=') {
            Some((k, v)) => (k.trim(), v.trim()),
            None => (attr.trim(), ""),
        };
        match key.to_ascii_lowercase().as_str() {
            "path" => cookie.path = val.to_string(),
            "domain" => cookie.domain = val.trim_start_matches('.').to_string(),
            "expires" => cookie.expires = parse_http_date(val),
            "httponly" => cookie.http_only = true,
            "secure" => cookie.secure = true,
            _ => {}
        }
    }

    Some(cookie)
}

/// Accepts IMF-fixdate (`Sun, 06 Nov 1994 08:49:37 GMT`) and the older
/// Netscape form with dashes (`Sunday, 06-Nov-94 08:49:37 GMT`).
fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc2822(value) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%a, %d-%b-%Y %H:%M:%S GMT", "%A, %d-%b-%y %H:%M:%S GMT"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn request_cookie_pairs() {
        let cookies = parse_cookie_header("a=1; b=\"two\"; =skip; c=");
        let names: Vec<_> = cookies.iter().map(|c| (c.name.as_str(), c.value.as_str())).collect();
        assert_eq!(names, vec![("a", "1"), ("b", "two"), ("c", "")]);
    }

    #[test]
    fn set_cookie_attributes() {
        let cookie = parse_set_cookie(
            "sid=abc; Path=/; Domain=.example.com; Expires=Wed, 21 Oct 2015 07:28:00 GMT; HttpOnly; Secure",
        )
        .unwrap();
        assert_eq!(cookie.name, "sid");
        assert_eq!(cookie.value, "abc");
        assert_eq!(cookie.path, "/");
        assert_eq!(cookie.domain, "example.com");
        assert_eq!(
            cookie.expires,
            Some(Utc.with_ymd_and_hms(2015, 10, 21, 7, 28, 0).unwrap())
        );
        assert!(cookie.http_only);
        assert!(cookie.secure);
    }

    #[test]
    fn set_cookie_without_expiry() {
        let cookie = parse_set_cookie("k=v").unwrap();
        assert_eq!(cookie.expires, None);
        assert!(parse_set_cookie("garbage").is_none());
    }

    #[test]
    fn netscape_expiry() {
        let cookie = parse_set_cookie("k=v; expires=Wed, 21-Oct-2015 07:28:00 GMT").unwrap();
        assert_eq!(
            cookie.expires,
            Some(Utc.with_ymd_and_hms(2015, 10, 21, 7, 28, 0).unwrap())
        );
    }
}
