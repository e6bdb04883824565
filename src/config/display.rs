use crate::config::types::AppConfig;

/// Prints the resolved configuration as a colorized startup banner, in the
/// style this codebase already uses for its terminal output.
pub fn display_config(cfg: &AppConfig) {
    println!("\x1b[1;36m┌─ preforkd configuration ─────────────────────────\x1b[0m");
    println!("\x1b[1;36m│\x1b[0m listen        {}:{}", cfg.host, cfg.port);
    println!("\x1b[1;36m│\x1b[0m backlog       {}", cfg.tcp_backlog_size);
    println!("\x1b[1;36m│\x1b[0m pool size     {}", cfg.process_count_limit);
    println!(
        "\x1b[1;36m│\x1b[0m sigterm grace {}s",
        cfg.process_sigterm_timeout
    );
    println!("\x1b[1;36m│\x1b[0m read buffer   {} bytes", cfg.read_buffer);
    println!(
        "\x1b[1;36m│\x1b[0m cgi meta cap  {} bytes",
        cfg.cgi_res_meta_limit
    );
    println!("\x1b[1;36m│\x1b[0m protocol      {}", cfg.protocol);
    println!("\x1b[1;36m│\x1b[0m req timeout   {}s", cfg.request_timeout);
    println!(
        "\x1b[1;36m│\x1b[0m conn timeout  {}s",
        cfg.connection_timeout
    );
    println!("\x1b[1;36m└──────────────────────────────────────────────────\x1b[0m");
}
