use std::{
    io::{BufRead as _, BufReader, Read as _, Write as _},
    net::{Ipv4Addr, SocketAddr, TcpStream},
    sync::Arc,
    time::{Duration, Instant},
};
use tmatrix::{ControlServer, EstimatorContext};
use tmatrix_core::{
    EstimatorConfig, HostIndex, Source,
    counter::{CounterKind, StaticCounters},
};

const PREFIX: &str = "hybrid_switch";

struct Client {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl Client {
    fn connect(addr: SocketAddr) -> Self {
        let writer = TcpStream::connect(addr).unwrap();
        writer
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let reader = BufReader::new(writer.try_clone().unwrap());
        let mut client = Self { reader, writer };
        assert_eq!(client.line(), "Click::ControlSocket/1.3\r\n");
        client
    }

    fn line(&mut self) -> String {
        let mut line = String::new();
        self.reader.read_line(&mut line).unwrap();
        line
    }

    fn send(&mut self, request: &str) -> String {
        self.writer.write_all(request.as_bytes()).unwrap();
        self.line()
    }

    fn read(&mut self, handler: &str) -> String {
        let status = self.send(&format!("READ {handler}\r\n"));
        assert!(status.starts_with("200 "), "{status:?}");

        let data = self.line();
        let length: usize = data
            .trim_end()
            .strip_prefix("DATA ")
            .unwrap()
            .parse()
            .unwrap();
        let mut payload = vec![0; length];
        self.reader.read_exact(&mut payload).unwrap();
        String::from_utf8(payload).unwrap()
    }
}

fn start(num_hosts: usize, source: Source) -> (EstimatorContext, ControlServer, Arc<StaticCounters>) {
    let counters = Arc::new(StaticCounters::zeroed(num_hosts, PREFIX));
    let config = EstimatorConfig::new(num_hosts, source)
        .unwrap()
        .set_telemetry_addr(SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0))
        .set_cycle_interval(Duration::from_micros(200));
    let context = EstimatorContext::new(&config, counters.clone()).unwrap();
    let control = ControlServer::bind(
        SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0),
        context.query(),
    )
    .unwrap();
    (context, control, counters)
}

#[test]
fn read_traffic() {
    let (context, control, counters) = start(2, Source::Direct);
    counters.set_queue(
        PREFIX,
        HostIndex::new(1),
        HostIndex::new(0),
        CounterKind::Bytes,
        1_500,
    );

    let mut client = Client::connect(control.local_addr());

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let traffic = client.read("traffic_matrix.getTraffic");
        if traffic == "0 0 1500 0" {
            break;
        }
        assert!(Instant::now() < deadline, "unexpected traffic {traffic:?}");
    }
    assert_eq!(client.read("getSource"), "QUEUE");

    control.shutdown().unwrap();
    context.shutdown().unwrap();
}

#[test]
fn write_handlers() {
    let (context, control, _counters) = start(2, Source::Direct);
    let query = context.query();
    let mut client = Client::connect(control.local_addr());

    assert_eq!(
        client.send("WRITE traffic_matrix.setSource ADU\n"),
        "200 Write handler 'setSource' OK\r\n"
    );
    assert_eq!(query.source(), Source::Telemetry);
    assert_eq!(client.read("traffic_matrix.getSource"), "ADU");

    assert_eq!(
        client.send("WRITE setSource anything\r\n"),
        "200 Write handler 'setSource' OK\r\n"
    );
    assert_eq!(query.source(), Source::Direct);

    assert_eq!(
        client.send("WRITE traffic_matrix.clear\r\n"),
        "200 Write handler 'clear' OK\r\n"
    );

    control.shutdown().unwrap();
    context.shutdown().unwrap();
}

#[test]
fn errors_keep_the_connection_open() {
    let (context, control, _counters) = start(2, Source::Direct);
    let mut client = Client::connect(control.local_addr());

    assert_eq!(
        client.send("READ traffic_matrix.getLatency\r\n"),
        "511 No such handler 'getLatency'\r\n"
    );
    assert_eq!(
        client.send("WRITE traffic_matrix.getTraffic 1\r\n"),
        "511 No such handler 'getTraffic'\r\n"
    );
    assert_eq!(client.send("GET /\r\n"), "500 Syntax error\r\n");
    assert_eq!(client.send("READ\r\n"), "500 Syntax error\r\n");

    assert_eq!(client.read("getSource"), "QUEUE");

    assert_eq!(client.send("QUIT\r\n"), "200 Goodbye!\r\n");
    assert_eq!(client.line(), "");

    control.shutdown().unwrap();
    context.shutdown().unwrap();
}

#[test]
fn several_clients() {
    let (context, control, _counters) = start(3, Source::Direct);

    let mut first = Client::connect(control.local_addr());
    let mut second = Client::connect(control.local_addr());

    // a request split over two writes
    second.writer.write_all(b"READ get").unwrap();
    assert_eq!(first.read("getSource"), "QUEUE");
    let status = second.send("Traffic\r\n");
    assert_eq!(status, "200 Read handler 'getTraffic' OK\r\n");
    assert_eq!(second.line(), "DATA 17\r\n");

    drop(first);
    drop(second);

    control.shutdown().unwrap();
    context.shutdown().unwrap();
}
