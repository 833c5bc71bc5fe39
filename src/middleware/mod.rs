mod gateway;
mod rate_limit;
mod request_id;

pub use gateway::gateway_middleware;
pub use rate_limit::{
    RATE_LIMIT_HEADERS, add_rate_limit_headers, extract_client_ip, extract_client_ip_from_parts,
};
pub use request_id::{REQUEST_ID_HEADER, RequestId, request_id_middleware};
