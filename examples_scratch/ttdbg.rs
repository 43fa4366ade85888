fn main() {
    use ttcom_proto::parmline::ParmLine;
    let line = ParmLine::parse(r#"updateuser udpaddr="[10.0.0.5]:1234""#).unwrap();
    println!("{:?}", line.get("udpaddr"));
}
