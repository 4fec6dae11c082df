//! SIP URIs and name-addr values (`"Bob" <sip:bob@host>;tag=x`).

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use nom::{
    branch::alt,
    bytes::complete::{tag_no_case, take_till1, take_while1},
    character::complete::{char, digit1},
    combinator::{map_res, opt},
    multi::many0,
    sequence::{pair, preceded, terminated},
    IResult,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::header::header_param;

/// Default SIP port
pub const DEFAULT_SIP_PORT: u16 = 5060;

/// URI scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scheme {
    Sip,
    Sips,
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheme::Sip => f.write_str("sip"),
            Scheme::Sips => f.write_str("sips"),
        }
    }
}

/// A `sip:` / `sips:` URI
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Uri {
    pub scheme: Scheme,
    pub user: Option<String>,
    pub host: String,
    pub port: Option<u16>,
    pub params: Vec<(String, Option<String>)>,
}

impl Uri {
    /// `sip:user@host[:port]`
    pub fn sip(user: Option<&str>, host: impl Into<String>, port: Option<u16>) -> Self {
        Self {
            scheme: Scheme::Sip,
            user: user.map(str::to_string),
            host: host.into(),
            port,
            params: Vec::new(),
        }
    }

    /// Port, falling back to 5060
    pub fn port_or_default(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_SIP_PORT)
    }

    /// Socket address when the host is a literal IP
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        let ip = self.host.trim_start_matches('[').trim_end_matches(']').parse::<IpAddr>().ok()?;
        Some(SocketAddr::new(ip, self.port_or_default()))
    }

    /// `host:port` text suitable for DNS lookup
    pub fn host_port(&self) -> String {
        format!("{}:{}", self.host, self.port_or_default())
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_deref().unwrap_or(""))
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.scheme)?;
        if let Some(user) = &self.user {
            write!(f, "{user}@")?;
        }
        f.write_str(&self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{port}")?;
        }
        for (k, v) in &self.params {
            match v {
                Some(v) => write!(f, ";{k}={v}")?,
                None => write!(f, ";{k}")?,
            }
        }
        Ok(())
    }
}

fn scheme(input: &str) -> IResult<&str, Scheme> {
    alt((
        nom::combinator::value(Scheme::Sips, tag_no_case("sips:")),
        nom::combinator::value(Scheme::Sip, tag_no_case("sip:")),
    ))(input)
}

fn userinfo(input: &str) -> IResult<&str, &str> {
    terminated(take_till1(|c| c == '@' || c == ';' || c == '>'), char('@'))(input)
}

fn host(input: &str) -> IResult<&str, &str> {
    alt((
        nom::combinator::recognize(pair(char('['), terminated(take_till1(|c| c == ']'), char(']')))),
        take_while1(|c: char| c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_'),
    ))(input)
}

fn port(input: &str) -> IResult<&str, u16> {
    preceded(char(':'), map_res(digit1, str::parse::<u16>))(input)
}

fn uri_param(input: &str) -> IResult<&str, (String, Option<String>)> {
    let (input, _) = char(';')(input)?;
    let (input, key) = take_while1(|c: char| c != '=' && c != ';' && c != '?' && c != '>')(input)?;
    let (input, value) = opt(preceded(
        char('='),
        take_while1(|c: char| c != ';' && c != '?' && c != '>'),
    ))(input)?;
    Ok((input, (key.to_string(), value.map(str::to_string))))
}

fn sip_uri(input: &str) -> IResult<&str, Uri> {
    let (input, scheme) = scheme(input)?;
    let (input, user) = opt(userinfo)(input)?;
    let (input, host) = host(input)?;
    let (input, port) = opt(port)(input)?;
    let (input, params) = many0(uri_param)(input)?;
    Ok((
        input,
        Uri {
            scheme,
            user: user.map(|u| u.split(':').next().unwrap_or(u).to_string()),
            host: host.to_string(),
            port,
            params,
        },
    ))
}

impl FromStr for Uri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        match sip_uri(trimmed) {
            Ok((rest, uri)) if rest.is_empty() || rest.starts_with('?') => Ok(uri),
            Ok((rest, _)) => Err(Error::InvalidUri(format!("trailing input '{rest}' in '{trimmed}'"))),
            Err(_) => Err(Error::InvalidUri(trimmed.to_string())),
        }
    }
}

/// The value of a From / To / Contact header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameAddr {
    pub display_name: Option<String>,
    pub uri: Uri,
    pub tag: Option<String>,
}

impl NameAddr {
    pub fn new(uri: Uri) -> Self {
        Self { display_name: None, uri, tag: None }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }
}

impl fmt::Display for NameAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = &self.display_name {
            write!(f, "\"{name}\" ")?;
        }
        write!(f, "<{}>", self.uri)?;
        if let Some(tag) = &self.tag {
            write!(f, ";tag={tag}")?;
        }
        Ok(())
    }
}

impl FromStr for NameAddr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let value = s.trim();
        let (display_name, uri) = match (value.find('<'), value.find('>')) {
            (Some(open), Some(close)) if open < close => {
                let name = value[..open].trim().trim_matches('"').trim();
                let name = (!name.is_empty()).then(|| name.to_string());
                (name, value[open + 1..close].parse::<Uri>()?)
            }
            _ => {
                // addr-spec form: header params follow the first ';'
                let spec = value.split(';').next().unwrap_or(value);
                (None, spec.parse::<Uri>()?)
            }
        };
        let tag = header_param(value, "tag").map(str::to_string);
        Ok(NameAddr { display_name, uri, tag })
    }
}
