use tuplespace::Client;

fn main() {
    let mut c = Client::connect(("127.0.0.1", tuplespace::DEFAULT_PORT)).expect("connect");

    // put, read, then take the same tuple
    println!("{}", c.put("hello", "big world").expect("put"));
    println!("{}", c.read("hello").expect("read"));
    println!("{}", c.get("hello").expect("get"));
    println!("{}", c.get("hello").expect("get"));
}
