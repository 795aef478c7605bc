pub mod decoders;
pub mod extract;
pub mod guid;
pub mod imap_client;
