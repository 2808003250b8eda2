#[cfg(test)]
mod tests {
    use crate::command::{Command, CommandList};
    use crate::command_manager::CommandManager;
    use crate::{AudioContext, AudioThread, VoiceEvent};
    use atk_shared::{AudioConfig, ChannelConfig};
    use bytemuck::{Pod, Zeroable};
    use crossbeam_channel::unbounded;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::{Duration, Instant};

    #[repr(C)]
    #[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
    struct Seq {
        value: u32,
    }

    impl Command for Seq {
        const KIND: u32 = 7;
        const NAME: &'static str = "Seq";
    }

    #[repr(C)]
    #[derive(Clone, Copy, Pod, Zeroable)]
    struct Oversized {
        samples: [u32; 32],
    }

    impl Command for Oversized {
        const KIND: u32 = 8;
        const NAME: &'static str = "Oversized";
    }

    /// Runs `process_command` in a loop until `stop` is set.
    fn spawn_consumer<H: crate::ProcessCommandList + 'static>(
        mut processor: crate::CommandProcessor<H>,
        stop: Arc<AtomicBool>,
    ) -> thread::JoinHandle<crate::CommandProcessor<H>> {
        thread::spawn(move || {
            while !stop.load(Ordering::Acquire) {
                if !processor.process_command() {
                    thread::sleep(Duration::from_micros(200));
                }
            }
            processor.process_command();
            processor
        })
    }

    #[test]
    fn test_wait_returns_once_consumer_runs() {
        // 1. Setup channel and consumer thread
        let (mut manager, processor) =
            CommandManager::initialize("Test", &ChannelConfig::new(1024, 4), |_list: CommandList<'_>| {}).unwrap();
        let stop = Arc::new(AtomicBool::new(false));
        let consumer = spawn_consumer(processor, stop.clone());

        // 2. Flush and wait from another thread so a hang shows up as a timeout
        let (done_tx, done_rx) = unbounded();
        let producer = thread::spawn(move || {
            manager.push_value(Seq { value: 1 }, false).unwrap();
            let tag = manager.flush_command(false, false).unwrap();
            manager.wait_command_reply(tag).unwrap();
            done_tx.send(manager.is_finish_command(tag)).unwrap();
            manager
        });

        let result = done_rx.recv_timeout(Duration::from_secs(5));
        assert_eq!(result, Ok(true), "wait_command_reply did not return");

        stop.store(true, Ordering::Release);
        consumer.join().unwrap();
        producer.join().unwrap().finalize();
    }

    #[test]
    fn test_forced_alloc_reclaims_space() {
        // 256 bytes hold 8 Seq records; push far more than that
        let (mut manager, processor) =
            CommandManager::initialize("Test", &ChannelConfig::new(256, 4), |_list: CommandList<'_>| {}).unwrap();
        let stop = Arc::new(AtomicBool::new(false));
        let consumer = spawn_consumer(processor, stop.clone());

        let (done_tx, done_rx) = unbounded();
        let producer = thread::spawn(move || {
            let mut pushed = 0;
            for i in 0..100 {
                if manager.push_value(Seq { value: i }, true).is_some() {
                    pushed += 1;
                }
            }
            done_tx.send(pushed).unwrap();
            manager
        });

        let pushed = done_rx.recv_timeout(Duration::from_secs(5));
        assert_eq!(pushed, Ok(100));

        stop.store(true, Ordering::Release);
        consumer.join().unwrap();
        producer.join().unwrap();
    }

    #[test]
    fn test_forced_alloc_still_too_large_returns_none() {
        // 64-byte arena, the record needs 144
        let (mut manager, processor) =
            CommandManager::initialize("Test", &ChannelConfig::new(64, 4), |_list: CommandList<'_>| {}).unwrap();
        let stop = Arc::new(AtomicBool::new(false));
        let consumer = spawn_consumer(processor, stop.clone());

        let (done_tx, done_rx) = unbounded();
        let producer = thread::spawn(move || {
            let missed = manager.alloc_command::<Oversized>(true).is_none();
            // The channel is still usable afterwards
            let tag = manager.push_value(Seq { value: 1 }, true);
            done_tx.send((missed, tag.is_some())).unwrap();
            manager
        });

        let result = done_rx.recv_timeout(Duration::from_secs(5));
        assert_eq!(result, Ok((true, true)), "forced alloc of an oversized record should fail without hanging");

        stop.store(true, Ordering::Release);
        consumer.join().unwrap();
        let manager = producer.join().unwrap();
        assert!(manager.command_buffer_capacity() < crate::command::record_size::<Oversized>());
    }

    #[test]
    fn test_order_preserved_across_flushes() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let (mut manager, processor) = CommandManager::initialize(
            "Test",
            &ChannelConfig::new(512, 2),
            move |list: CommandList<'_>| {
                let mut sink = sink.lock().unwrap();
                sink.extend(list.filter_map(|view| view.downcast::<Seq>().map(|s| s.value)));
            },
        )
        .unwrap();
        let stop = Arc::new(AtomicBool::new(false));
        let consumer = spawn_consumer(processor, stop.clone());

        // 512 bytes hold 16 records, so some pushes go through the forced flush path
        for i in 0..1000u32 {
            manager.push_value(Seq { value: i }, true).unwrap();
            if i % 7 == 6 {
                manager.flush_command(false, false).unwrap();
            }
        }
        let tag = manager.flush_command(true, false).unwrap();
        manager.wait_command_reply(tag).unwrap();

        stop.store(true, Ordering::Release);
        consumer.join().unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1000);
        assert!(seen.iter().enumerate().all(|(i, v)| *v == i as u32));
    }

    #[test]
    fn test_audio_thread_integration() {
        // 1. Setup context and audio thread
        let config = AudioConfig {
            max_voices: 8,
            frames_per_tick: 256,
            tick_interval_ms: 1,
            ..AudioConfig::default()
        };
        let (mut ctx, voice_processor) = AudioContext::new(&config).expect("Failed to create context");
        let audio = AudioThread::spawn(
            voice_processor,
            config.frames_per_tick,
            Duration::from_millis(config.tick_interval_ms),
        )
        .expect("Failed to spawn audio thread");
        ctx.set_request_process_command_func(audio.waker());
        assert!(audio.is_running());

        // 2. Start two voices of different length
        let short = ctx.alloc_voice(1).unwrap();
        let long = ctx.alloc_voice(1).unwrap();
        ctx.play(short, 512, 0).unwrap();
        ctx.play(long, 2048, 1).unwrap();
        let tag = ctx.flush().unwrap();
        ctx.wait(tag).unwrap();
        println!("[Test] Voices started, tag {} confirmed", tag);

        // 3. Poll until both voices report back
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut finished = Vec::new();
        while finished.len() < 2 && Instant::now() < deadline {
            for (voice, event) in ctx.update().unwrap() {
                assert_eq!(event, VoiceEvent::Finished);
                finished.push(voice);
            }
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(finished, vec![short, long], "Both voices should finish, short one first");
        assert!(!ctx.is_playing(short) && !ctx.is_playing(long));

        // 4. Shutdown hands the renderer back
        ctx.free_voice(short).unwrap();
        let tag = ctx.flush().unwrap();
        ctx.wait(tag).unwrap();
        let processor = audio.shutdown().unwrap();
        assert!(!processor.handler().voice(short).unwrap().allocated);
        assert!(processor.handler().voice(long).unwrap().allocated);
        assert!(processor.handler().rendered_frames() >= 2048);
        ctx.finalize();
    }
}
