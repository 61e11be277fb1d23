//! Producer and mouse consumer on one pointer channel
//! Demonstrates locked updates, flag consumption and motion splitting

use shmlink::{
    BackendKind, ChannelConfig, Layout, MouseConfig, MouseEvent, MouseSource, PointerUpdate,
    SharedStructChannel, ShmResult,
};
use std::thread;
use std::time::Duration;

fn producer(config: ChannelConfig) -> ShmResult<()> {
    println!("Producer: Starting...");
    let channel = SharedStructChannel::open_or_create_with(config, Layout::pointer())?;

    for i in 0..10 {
        let update = if i % 2 == 0 {
            PointerUpdate::along_x(55 * (i + 1))
        } else {
            PointerUpdate::along_y(-55 * (i + 1))
        };
        channel.write_record(&update)?;
        println!("Producer: Wrote #{}: {:?}", i, update);
        thread::sleep(Duration::from_millis(50));
    }
    Ok(())
}

fn consumer(config: ChannelConfig) -> ShmResult<()> {
    println!("Consumer: Starting...");
    thread::sleep(Duration::from_millis(20));

    let channel = SharedStructChannel::attach_with(config, Layout::pointer())?;
    let mouse_config = MouseConfig::default();
    let interval = mouse_config.poll_interval();
    let mut mouse = MouseSource::new(channel, mouse_config)?;

    for _ in 0..200 {
        for event in mouse.poll()? {
            if let MouseEvent::Motion(m) = event {
                println!("Consumer: motion xrel={:4} yrel={:4}", m.xrel, m.yrel);
            }
        }
        thread::sleep(interval);
    }
    Ok(())
}

fn main() -> ShmResult<()> {
    shmlink::init_tracing();

    let dir = std::env::temp_dir();
    let config = ChannelConfig::new(454)
        .with_backend(BackendKind::File)
        .with_shm_dir(&dir);

    // Create up front so the consumer can attach.
    let mut owner = SharedStructChannel::open_or_create_with(config.clone(), Layout::pointer())?;

    let producer_config = config.clone();
    let producer_handle = thread::spawn(move || producer(producer_config));
    let consumer_handle = thread::spawn(move || consumer(config));

    if let Ok(Err(e)) = producer_handle.join() {
        eprintln!("Producer error: {}", e);
    }
    if let Ok(Err(e)) = consumer_handle.join() {
        eprintln!("Consumer error: {}", e);
    }

    owner.destroy()?;
    println!("Done");
    Ok(())
}
