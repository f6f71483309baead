//! The UDP server and the query-to-response transformation it drives

use std::collections::VecDeque;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::Builder;

use derive_more::{Display, Error, From};

use crate::dns::authority::Resolution;
use crate::dns::buffer::{BytePacketBuffer, VectorPacketBuffer, MAX_PACKET_SIZE};
use crate::dns::context::ServerContext;
use crate::dns::protocol::{DnsHeader, DnsQuery};

#[derive(Debug, Display, From, Error)]
pub enum ServerError {
    Io(std::io::Error),
    Protocol(crate::dns::protocol::ProtocolError),
    Authority(crate::dns::authority::AuthorityError),
}

type Result<T> = std::result::Result<T, ServerError>;

macro_rules! ignore_or_report {
    ( $x:expr, $message:expr ) => {
        match $x {
            Ok(_) => {}
            Err(_) => {
                log::info!($message);
                return;
            }
        };
    };
}

/// Transform one raw query datagram into a complete response datagram.
///
/// This is the whole request pipeline: parse the header and question,
/// resolve the records, serialize header, question and answers. Stateless;
/// every request is independent and the authority is read-only.
///
/// A parse failure or a miss on the zone store is an error and no bytes are
/// produced - the caller drops the request. An unsupported question type is
/// not an error: the response simply carries no answer records.
pub fn build_response(context: &ServerContext, raw: &[u8]) -> Result<Vec<u8>> {
    let mut req_buffer = BytePacketBuffer::from_slice(raw);
    let query = DnsQuery::from_buffer(&mut req_buffer)?;

    let resolution = context.authority.resolve(&query.question)?;

    let mut res_buffer = VectorPacketBuffer::new();

    match resolution {
        Resolution::Records { kind, records } => {
            let header = DnsHeader::response_to(&query.header, records.len() as u16);
            header.write(&mut res_buffer)?;
            query.question.write(&mut res_buffer)?;

            for record in records {
                record.write_answer(kind, &mut res_buffer)?;
            }
        }
        Resolution::Unsupported(qtype) => {
            log::info!(
                "No records served for question type {} ({})",
                qtype,
                query.question.name()
            );

            let header = DnsHeader::response_to(&query.header, 0);
            header.write(&mut res_buffer)?;
            query.question.write(&mut res_buffer)?;
        }
    }

    Ok(res_buffer.bytes().to_vec())
}

/// The UDP server.
///
/// Receives DNS queries on a single socket and services them on a small
/// pool of worker threads. The workers share nothing but the read-only
/// `ServerContext`, so no locking is needed beyond the request queue
/// itself.
pub struct DnsUdpServer {
    context: Arc<ServerContext>,
    request_queue: Arc<Mutex<VecDeque<(SocketAddr, Vec<u8>)>>>,
    request_cond: Arc<Condvar>,
}

impl DnsUdpServer {
    pub fn new(context: Arc<ServerContext>) -> DnsUdpServer {
        DnsUdpServer {
            context,
            request_queue: Arc::new(Mutex::new(VecDeque::new())),
            request_cond: Arc::new(Condvar::new()),
        }
    }

    /// Service a single request and send the response.
    ///
    /// A failed request must never take the server down or leak a partial
    /// packet: the error is logged, the drop counter bumped, and nothing is
    /// sent.
    fn process_request(
        socket: &UdpSocket,
        context: &ServerContext,
        src: SocketAddr,
        raw: &[u8],
    ) {
        let response = match build_response(context, raw) {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = context
                    .statistics
                    .dropped_query_count
                    .fetch_add(1, Ordering::Release);
                log::info!("Dropping query from {}: {}", src, e);
                return;
            }
        };

        ignore_or_report!(
            socket.send_to(&response, src),
            "Failed to send response packet"
        );
    }

    /// Spawn a worker thread that services queued requests
    fn spawn_request_handler(&self, thread_id: usize, socket: UdpSocket) -> std::io::Result<()> {
        let context = self.context.clone();
        let request_cond = self.request_cond.clone();
        let request_queue = self.request_queue.clone();

        let name = format!("DnsUdpServer-request-{}", thread_id);

        Builder::new().name(name).spawn(move || {
            loop {
                // Wait until a request is available, then take it
                let (src, raw) = {
                    let queue = match request_queue.lock() {
                        Ok(x) => x,
                        Err(e) => {
                            log::info!("Failed to lock request queue: {}", e);
                            return;
                        }
                    };

                    let mut queue = match request_cond.wait_while(queue, |q| q.is_empty()) {
                        Ok(x) => x,
                        Err(e) => {
                            log::info!("Failed to wait on request queue: {}", e);
                            return;
                        }
                    };

                    match queue.pop_front() {
                        Some(x) => x,
                        None => continue,
                    }
                };

                Self::process_request(&socket, &context, src, &raw);
            }
        })?;

        Ok(())
    }

    fn enqueue_request(&self, src: SocketAddr, raw: Vec<u8>) {
        match self.request_queue.lock() {
            Ok(mut queue) => {
                queue.push_back((src, raw));
                self.request_cond.notify_one();
            }
            Err(e) => {
                log::info!("Failed to enqueue UDP request for processing: {}", e);
            }
        }
    }

    /// Bind the socket, start the worker pool and service incoming
    /// datagrams. Blocks the calling thread for the life of the server.
    pub fn run_server(self) -> Result<()> {
        let socket = UdpSocket::bind((self.context.config.bind_address, self.context.config.dns_port))?;

        for thread_id in 0..self.context.config.worker_threads {
            let socket_clone = match socket.try_clone() {
                Ok(x) => x,
                Err(e) => {
                    log::info!("Failed to clone socket when starting UDP server: {:?}", e);
                    continue;
                }
            };

            self.spawn_request_handler(thread_id, socket_clone)?;
        }

        loop {
            let mut buf = [0u8; MAX_PACKET_SIZE];
            let (len, src) = match socket.recv_from(&mut buf) {
                Ok(x) => x,
                Err(e) => {
                    log::info!("Failed to read from UDP socket: {:?}", e);
                    continue;
                }
            };

            let _ = self
                .context
                .statistics
                .udp_query_count
                .fetch_add(1, Ordering::Release);

            self.enqueue_request(src, buf[..len].to_vec());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::dns::authority::{AuthorityError, Zone};
    use crate::dns::context::tests::{create_test_context, example_zone};
    use crate::dns::protocol::{
        DnsQuestion, ProtocolError, QueryType, RecordKind, ZoneRecord, HEADER_SIZE,
    };

    fn build_query(id: u16, qname: &str, qtype: QueryType) -> Vec<u8> {
        let mut header = DnsHeader::new();
        header.id = id;
        header.recursion_desired = true;
        header.questions = 1;

        let question = DnsQuestion::new(
            qname.split('.').map(|x| x.to_string()).collect(),
            qtype,
        );

        let mut buffer = VectorPacketBuffer::new();
        header.write(&mut buffer).unwrap();
        question.write(&mut buffer).unwrap();

        buffer.bytes().to_vec()
    }

    fn answer_count(response: &[u8]) -> u16 {
        ((response[6] as u16) << 8) | response[7] as u16
    }

    #[test]
    fn test_end_to_end_single_answer() {
        let context = create_test_context(vec![example_zone()]);

        let query = build_query(0xABCD, "example.com", QueryType::A);
        let response = build_response(&context, &query).unwrap();

        // Header: id echoed, QR/AA set, all other flags forced off
        assert_eq!(&[0xAB, 0xCD, 0x84, 0x00], &response[0..4]);
        assert_eq!(1, answer_count(&response));

        // Question section: name, type A, class IN
        let question_len = "example.com".len() + 2 + 4;
        let question = &response[HEADER_SIZE..HEADER_SIZE + question_len];
        assert_eq!(
            &[
                7, b'e', b'x', b'a', b'm', b'p', b'l', b'e', 3, b'c', b'o', b'm', 0,
                0, 1, 0, 1,
            ],
            question
        );

        // Answer: pointer at 0x0C, type/class 1/1, ttl 3600, rdata 10.0.0.1
        let answer = &response[HEADER_SIZE + question_len..];
        assert_eq!(
            &[0xC0, 0x0C, 0, 1, 0, 1, 0, 0, 0x0E, 0x10, 0, 4, 10, 0, 0, 1],
            answer
        );
    }

    #[test]
    fn test_end_to_end_multiple_answers_preserve_order() {
        let mut zone = Zone::new("example.com".to_string());
        zone.add_record(
            RecordKind::A,
            ZoneRecord {
                ttl: 60,
                value: "10.0.0.1".to_string(),
            },
        );
        zone.add_record(
            RecordKind::A,
            ZoneRecord {
                ttl: 60,
                value: "10.0.0.2".to_string(),
            },
        );
        let context = create_test_context(vec![zone]);

        let query = build_query(7, "example.com", QueryType::A);
        let response = build_response(&context, &query).unwrap();

        assert_eq!(2, answer_count(&response));

        let answers_start = HEADER_SIZE + "example.com".len() + 2 + 4;
        let answers = &response[answers_start..];
        assert_eq!(32, answers.len()); // two 16-byte A records

        assert_eq!(&[10, 0, 0, 1], &answers[12..16]);
        assert_eq!(&[10, 0, 0, 2], &answers[28..32]);
    }

    #[test]
    fn test_end_to_end_no_records_of_kind() {
        let context = create_test_context(vec![Zone::new("empty.test".to_string())]);

        let query = build_query(1, "empty.test", QueryType::A);
        let response = build_response(&context, &query).unwrap();

        assert_eq!(0, answer_count(&response));
        assert_eq!(HEADER_SIZE + "empty.test".len() + 2 + 4, response.len());
    }

    #[test]
    fn test_end_to_end_unknown_zone_is_dropped() {
        let context = create_test_context(vec![example_zone()]);

        let query = build_query(2, "other.org", QueryType::A);
        match build_response(&context, &query) {
            Err(ServerError::Authority(AuthorityError::NoSuchZone(origin))) => {
                assert_eq!("other.org", origin)
            }
            other => panic!("expected NoSuchZone, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_end_to_end_unsupported_type_yields_empty_answer() {
        let context = create_test_context(vec![example_zone()]);

        // MX is not served; the question is echoed, with no answers
        let query = build_query(3, "example.com", QueryType::Unknown(15));
        let response = build_response(&context, &query).unwrap();

        assert_eq!(0, answer_count(&response));

        let type_offset = HEADER_SIZE + "example.com".len() + 2;
        assert_eq!(&[0, 15], &response[type_offset..type_offset + 2]);
    }

    #[test]
    fn test_end_to_end_malformed_query_is_rejected() {
        let context = create_test_context(vec![example_zone()]);

        // Label length larger than the rest of the datagram
        let mut query = build_query(4, "example.com", QueryType::A);
        query.truncate(HEADER_SIZE);
        query.push(63);
        query.extend_from_slice(b"exa");

        match build_response(&context, &query) {
            Err(ServerError::Protocol(ProtocolError::Buffer(_))) => {}
            other => panic!("expected buffer error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_end_to_end_short_datagram_is_rejected() {
        let context = create_test_context(vec![example_zone()]);

        match build_response(&context, &[0x12, 0x34, 0x01]) {
            Err(ServerError::Protocol(_)) => {}
            other => panic!("expected protocol error, got {:?}", other.map(|_| ())),
        }
    }
}
