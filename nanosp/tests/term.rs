//! `nn::term` affects the whole process, so it gets a test binary of its own.

use std::thread;
use std::time::Duration;

use nanosp::nn::{self, AF_SP, ETERM, NN_PAIR};
use nanosp::NanospError;

#[test]
fn test_term_wakes_blocked_calls_and_refuses_new_sockets() {
    let s = nn::socket(AF_SP, NN_PAIR).unwrap();
    nn::bind(s, "inproc://term").unwrap();

    let waiter = thread::spawn(move || nn::recv(s, 0));
    thread::sleep(Duration::from_millis(50));
    nn::term();

    assert!(matches!(waiter.join().unwrap(), Err(NanospError::Shutdown)));
    assert!(matches!(nn::recv(s, 0), Err(NanospError::InvalidDescriptor)));
    assert!(matches!(
        nn::socket(AF_SP, NN_PAIR),
        Err(NanospError::Terminated)
    ));
    assert_eq!(nn::errno(), ETERM);
}
