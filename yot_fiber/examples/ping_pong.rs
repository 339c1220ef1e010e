use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Duration;

use log::info;
use mio::unix::pipe;
use yot_fiber::{Handle, sync::Mutex};

#[yot_fiber::main]
async fn main(handle: Handle) {
    let (mut sender, mut receiver) = pipe::new().expect("pipe");
    let hits = Arc::new(Mutex::new(0u32));

    let reader = handle.clone();
    let counter = hits.clone();
    handle
        .spawn(async move {
            let mut buf = [0; 4];
            for _ in 0..3 {
                reader.wait_readable(&receiver).await.unwrap();
                let n = receiver.read(&mut buf).unwrap();
                *counter.lock(&reader).await.unwrap() += 1;
                info!("read {:?}", &buf[..n]);
            }
        })
        .unwrap();

    for round in 0..3u8 {
        handle.wait_sleep(Duration::from_millis(20)).await.unwrap();
        sender.write_all(&[round]).unwrap();
    }

    handle.wait_sleep(Duration::from_millis(20)).await.unwrap();
    info!("{} reads, {:?}", *hits.lock(&handle).await.unwrap(), handle.stats());
}
