// Demo host: maps a memfd-backed region, serves its fd on a unix socket so
// clients can attach, then publishes text payloads round-robin and runs the
// GC pass at a steady cadence.
use sendfd::SendWithFd;
use shm_mq::{Error, Host, MemFd};
use std::os::fd::AsRawFd;
use std::os::unix::net::{UnixListener, UnixStream};
use std::time::Duration;

const SOCKET_PATH: &str = "/tmp/shm-mq-demo.sock";
const REGION_SIZE: usize = 10 * 1048576;

fn main() {
    let mem_fd = MemFd::new("shm-mq-demo", REGION_SIZE).expect("Create region");
    let segment_fd = mem_fd.to_owned_fd();

    let _ = std::fs::remove_file(SOCKET_PATH);
    let listener = UnixListener::bind(SOCKET_PATH).expect("Bind socket");
    listener
        .set_nonblocking(true)
        .expect("Couldn't set non blocking");

    let mut host = Host::init(mem_fd.region()).expect("Init host");
    let mut queue = host.add_queue(0, 10).expect("Add queue");

    let texts: [&[u8]; 10] = [
        b"This is a test from the host application",
        b"With multiple buffers",
        b"Containing text",
        b"That might or might not be",
        b"interesting.",
        b"This is buffer number 6",
        b"Now number 7",
        b"And now number 8",
        b"Second last buffer",
        b"It's over!",
    ];
    let mut payloads = vec![];
    for text in texts {
        let mut payload = host.mem_alloc(1024).expect("Alloc payload");
        payload.copy_from(text);
        payloads.push(payload);
    }

    println!("serving the region fd on {}", SOCKET_PATH);
    let mut clients: Vec<UnixStream> = vec![];
    let mut count: u32 = 0;
    loop {
        // hand the region to any newly attached client
        loop {
            let stream = match listener.incoming().next() {
                Some(Ok(stream)) => stream,
                Some(Err(err)) => match err.kind() {
                    std::io::ErrorKind::WouldBlock => break,
                    _ => {
                        eprintln!("Connection failed: {}", err);
                        break;
                    }
                },
                None => break,
            };

            let bytes = [0; 1];
            let fds = [segment_fd.as_raw_fd(); 1];
            stream
                .send_with_fd(&bytes, &fds)
                .expect("Somehow brand new socket isn't available");
            clients.push(stream);
        }

        // publish until backpressure, then let the GC pass retire heads
        loop {
            match queue.post(count, &payloads[count as usize % payloads.len()]) {
                Ok(()) => count += 1,
                Err(Error::QueueFull) => break,
                Err(err) => {
                    eprintln!("post failed: {}", err);
                    return;
                }
            }
        }
        host.process();

        std::thread::sleep(Duration::from_millis(1));
    }
}
