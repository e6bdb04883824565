use crate::config::parser::{ConfigParser, FromYaml, ParseResult};

// --- Constants ---
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_TCP_BACKLOG_SIZE: usize = 128;
pub const DEFAULT_PROCESS_COUNT_LIMIT: usize = 4;
pub const DEFAULT_PROCESS_SIGTERM_TIMEOUT: u64 = 5;
pub const DEFAULT_READ_BUFFER: usize = 65536;
pub const DEFAULT_CGI_RES_META_LIMIT: usize = 65536;
pub const DEFAULT_PROTOCOL: &str = "HTTP/1.1";
pub const DEFAULT_REQUEST_TIMEOUT: u64 = 30;
pub const DEFAULT_CONNECTION_TIMEOUT: u64 = 60;

/// Flat, immutable runtime configuration. Every field is read once at
/// startup; there is no nested routing table since request dispatch is
/// delegated to the pluggable handler.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub tcp_backlog_size: usize,
    pub process_count_limit: usize,
    pub process_sigterm_timeout: u64,
    pub read_buffer: usize,
    pub cgi_res_meta_limit: usize,
    pub protocol: String,
    pub request_timeout: u64,
    pub connection_timeout: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            tcp_backlog_size: DEFAULT_TCP_BACKLOG_SIZE,
            process_count_limit: DEFAULT_PROCESS_COUNT_LIMIT,
            process_sigterm_timeout: DEFAULT_PROCESS_SIGTERM_TIMEOUT,
            read_buffer: DEFAULT_READ_BUFFER,
            cgi_res_meta_limit: DEFAULT_CGI_RES_META_LIMIT,
            protocol: DEFAULT_PROTOCOL.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
        }
    }
}

impl FromYaml for AppConfig {
    fn from_yaml(parser: &mut ConfigParser, min_indent: usize) -> ParseResult<Self> {
        let mut cfg = AppConfig::default();
        let mut struct_indent = None;

        while parser.check_indentation(min_indent, &mut struct_indent)? {
            let Some(key) = parser.parse_map_key()? else {
                break;
            };
            parser.consume_key(&key)?;
            let indent = struct_indent.unwrap_or(min_indent);

            match key.as_str() {
                "host" => cfg.host = String::from_yaml(parser, indent)?,
                "port" => cfg.port = u16::from_yaml(parser, indent)?,
                "tcp_backlog_size" => cfg.tcp_backlog_size = usize::from_yaml(parser, indent)?,
                "process_count_limit" => {
                    cfg.process_count_limit = usize::from_yaml(parser, indent)?
                }
                "process_sigterm_timeout" => {
                    cfg.process_sigterm_timeout = usize::from_yaml(parser, indent)? as u64
                }
                "read_buffer" => cfg.read_buffer = usize::from_yaml(parser, indent)?,
                "cgi_res_meta_limit" => {
                    cfg.cgi_res_meta_limit = usize::from_yaml(parser, indent)?
                }
                "protocol" => cfg.protocol = String::from_yaml(parser, indent)?,
                "request_timeout" => {
                    cfg.request_timeout = usize::from_yaml(parser, indent)? as u64
                }
                "connection_timeout" => {
                    cfg.connection_timeout = usize::from_yaml(parser, indent)? as u64
                }
                _ => parser.skip_value(indent)?,
            }
        }

        Ok(cfg)
    }
}
