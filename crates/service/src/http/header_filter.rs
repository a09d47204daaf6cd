use axum::http::HeaderName;

fn is_hop_by_hop_header(name: &str) -> bool {
    name.eq_ignore_ascii_case("connection")
        || name.eq_ignore_ascii_case("keep-alive")
        || name.eq_ignore_ascii_case("proxy-authenticate")
        || name.eq_ignore_ascii_case("proxy-authorization")
        || name.eq_ignore_ascii_case("te")
        || name.eq_ignore_ascii_case("trailer")
        || name.eq_ignore_ascii_case("transfer-encoding")
        || name.eq_ignore_ascii_case("upgrade")
}

// 中文注释：content-length 保留给客户端；body 是原样转发的，长度与上游一致。
pub(crate) fn should_skip_response_header(name: &HeaderName) -> bool {
    is_hop_by_hop_header(name.as_str())
}
