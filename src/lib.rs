//! A small TFTP-like file transfer protocol that runs over either a TCP
//! stream or UDP datagrams.

pub mod tftp;
