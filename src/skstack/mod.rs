pub mod ipv6;
pub mod modem;
pub mod response;
