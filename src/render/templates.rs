//! Fixed headers of the generated config files

/// Header of the client-proxy (proxychains) config
pub const PROXYCHAINS_HEADER: &str = "
# This file is generated by proxyfleet and rewritten on every `up`.
# Local edits are lost; change the template in src/render/templates.rs instead.
random_chain
quiet_mode
proxy_dns
remote_dns_subnet 224
tcp_read_time_out 15000
tcp_connect_time_out 8000

[ProxyList]
";

/// Header of the load-balancer (HAProxy) config, up to the backend block
pub fn haproxy_header(listen_port: u16) -> String {
    format!(
        "
# This file is generated by proxyfleet and rewritten on every `up`.
# Local edits are lost; change the template in src/render/templates.rs instead.
global
        daemon
        user root
        group root

defaults
        mode tcp
        maxconn 3000
        timeout connect 5000ms
        timeout client 50000ms
        timeout server 50000ms

listen funnel_proxy
        bind *:{listen_port}
        mode tcp
        balance roundrobin
        default_backend proxyfleet

backend proxyfleet
"
    )
}
