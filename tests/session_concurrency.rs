//! Concurrency guarantees of batch runs and event routing

mod common;

use bgremove_compositor::{
    dispatcher::{Dispatcher, EventRouter, InboundEvent, InboundPayload, OutboundReply, Outbox},
    types::{SessionKey, SizingMode},
};
use common::*;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn px(pixels: u32) -> NonZeroU32 {
    NonZeroU32::new(pixels).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_image_queued_mid_batch_waits_for_next_batch() {
    let remover = Arc::new(GatedRemover::new());
    let processor = Arc::new(processor_with(remover.clone()));
    let key = SessionKey::from("mid-batch");

    let first = processor.images().stage(photo_png(20, 10));
    processor.sessions().enqueue_image(&key, first);
    processor
        .sessions()
        .set_sizing(&key, SizingMode::ByWidth, px(32));

    let running = {
        let processor = Arc::clone(&processor);
        let key = key.clone();
        tokio::spawn(async move { processor.process_batch(&key).await })
    };
    remover.wait_for_started(1).await;

    let late = processor.images().stage(photo_png(10, 20));
    assert_eq!(processor.sessions().enqueue_image(&key, late), 1);

    remover.open();
    let report = running.await.unwrap().unwrap();
    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(report.success_count(), 1);

    let session = processor.sessions().get_or_create(&key);
    assert_eq!(session.queued_images, vec![late]);

    let next = processor.process_batch(&key).await.unwrap();
    assert_eq!(next.outcomes.len(), 1);
    assert_eq!(next.outcomes[0].index, 1);
    let result = next.outcomes[0].result.as_ref().unwrap();
    assert_eq!(result.dimensions, (CANVAS_SIZE, CANVAS_SIZE));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_batches_of_one_session_never_overlap() {
    let remover = Arc::new(GatedRemover::new());
    let processor = Arc::new(processor_with(remover.clone()));
    let key = SessionKey::from("serial");

    for _ in 0..2 {
        let image_ref = processor.images().stage(photo_png(12, 12));
        processor.sessions().enqueue_image(&key, image_ref);
    }
    processor
        .sessions()
        .set_sizing(&key, SizingMode::ByHeight, px(20));

    let spawn_batch = || {
        let processor = Arc::clone(&processor);
        let key = key.clone();
        tokio::spawn(async move { processor.process_batch(&key).await })
    };
    let first = spawn_batch();
    remover.wait_for_started(1).await;
    let second = spawn_batch();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(remover.started(), 1, "second batch must wait for the first");

    remover.open();
    let first = first.await.unwrap().unwrap();
    let second = second.await.unwrap().unwrap();

    assert_eq!(first.outcomes.len(), 2);
    assert!(second.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_different_sessions_run_in_parallel() {
    let remover = Arc::new(GatedRemover::new());
    let processor = Arc::new(processor_with(remover.clone()));

    let mut running = Vec::new();
    for name in ["alice", "bob"] {
        let key = SessionKey::from(name);
        let image_ref = processor.images().stage(photo_png(16, 16));
        processor.sessions().enqueue_image(&key, image_ref);
        processor
            .sessions()
            .set_sizing(&key, SizingMode::ByWidth, px(16));

        let processor = Arc::clone(&processor);
        running.push(tokio::spawn(async move { processor.process_batch(&key).await }));
    }

    // Both removals are parked at the gate at once.
    remover.wait_for_started(2).await;
    remover.open();

    for handle in running {
        let report = handle.await.unwrap().unwrap();
        assert_eq!(report.success_count(), 1);
    }
}

#[tokio::test]
async fn test_router_keeps_per_session_order() {
    let dispatcher = Arc::new(dispatcher());
    let outbox = Arc::new(RecordingOutbox::default());
    let (sender, inbox) = mpsc::channel(16);
    let routing = tokio::spawn(
        EventRouter::new(dispatcher).run(inbox, outbox.clone() as Arc<dyn Outbox>),
    );

    let alice = SessionKey::from("alice");
    let bob = SessionKey::from("bob");
    let events = [
        InboundEvent::ImageArrived(alice.clone(), InboundPayload::Photo(photo_png(20, 10))),
        InboundEvent::ImageArrived(bob.clone(), InboundPayload::Photo(photo_png(10, 20))),
        InboundEvent::from_text(alice.clone(), "width 32"),
        InboundEvent::ImageArrived(bob.clone(), InboundPayload::Photo(photo_png(10, 10))),
        InboundEvent::from_text(bob.clone(), "height 16"),
    ];
    for event in events {
        sender.send(event).await.unwrap();
    }
    drop(sender);
    routing.await.unwrap();

    let replies = outbox.for_session(&alice);
    assert_eq!(replies.len(), 3);
    assert!(matches!(&replies[0], OutboundReply::Text(text) if text.contains("Image 1 queued")));
    assert_eq!(
        replies[1],
        OutboundReply::Text("📏 Size set to width 32px.".to_string())
    );
    assert_eq!(photo_indices(&replies), vec![1]);

    let replies = outbox.for_session(&bob);
    assert!(matches!(&replies[0], OutboundReply::Text(text) if text.contains("Image 1 queued")));
    assert!(matches!(&replies[1], OutboundReply::Text(text) if text.contains("Image 2 queued")));
    assert_eq!(photo_indices(&replies), vec![1, 2]);
}

#[tokio::test]
async fn test_router_respawns_idle_workers_in_order() {
    let dispatcher = Arc::new(Dispatcher::new(Arc::new(processor()), 8192));
    let outbox = Arc::new(RecordingOutbox::default());
    let (sender, inbox) = mpsc::channel(16);
    let routing = tokio::spawn(
        EventRouter::new(dispatcher)
            .with_idle_timeout(Duration::from_millis(10))
            .run(inbox, outbox.clone() as Arc<dyn Outbox>),
    );

    let key = SessionKey::from("sleepy");
    sender
        .send(InboundEvent::ImageArrived(
            key.clone(),
            InboundPayload::Photo(photo_png(12, 12)),
        ))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;
    sender
        .send(InboundEvent::from_text(key.clone(), "width 24"))
        .await
        .unwrap();
    sender
        .send(InboundEvent::from_text(key.clone(), "done"))
        .await
        .unwrap();
    drop(sender);
    routing.await.unwrap();

    let replies = outbox.for_session(&key);
    assert_eq!(replies.len(), 4);
    assert!(matches!(&replies[0], OutboundReply::Text(text) if text.contains("queued")));
    assert!(matches!(&replies[1], OutboundReply::Text(text) if text.starts_with("📏 Size set")));
    assert!(matches!(&replies[2], OutboundReply::Photo { index: 1, .. }));
    assert_eq!(
        replies[3],
        OutboundReply::Text("📭 No images queued. Send a photo first.".to_string())
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_busy_session_does_not_stall_other_sessions() {
    let remover = Arc::new(GatedRemover::new());
    let dispatcher = Arc::new(dispatcher_with(remover.clone()));
    let outbox = Arc::new(RecordingOutbox::default());
    let (sender, inbox) = mpsc::channel(16);
    let routing = tokio::spawn(
        EventRouter::new(dispatcher).run(inbox, outbox.clone() as Arc<dyn Outbox>),
    );

    let busy = SessionKey::from("busy");
    let other = SessionKey::from("other");
    sender
        .send(InboundEvent::ImageArrived(
            busy.clone(),
            InboundPayload::Photo(photo_png(12, 12)),
        ))
        .await
        .unwrap();
    sender
        .send(InboundEvent::from_text(busy.clone(), "width 16"))
        .await
        .unwrap();
    remover.wait_for_started(1).await;

    for _ in 0..3 {
        sender
            .send(InboundEvent::Start(busy.clone()))
            .await
            .unwrap();
    }
    sender.send(InboundEvent::Start(other.clone())).await.unwrap();

    let mut answered = false;
    for _ in 0..200 {
        if !outbox.for_session(&other).is_empty() {
            answered = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(answered, "other session waited for the busy batch");
    assert_eq!(remover.started(), 1);

    remover.open();
    drop(sender);
    routing.await.unwrap();

    let replies = outbox.for_session(&busy);
    assert_eq!(photo_indices(&replies), vec![1]);
    assert_eq!(replies.len(), 6);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_aborted_batch_releases_every_drained_image() {
    let remover = Arc::new(GatedRemover::new());
    let processor = Arc::new(processor_with(remover.clone()));
    let key = SessionKey::from("abandoned");

    for _ in 0..3 {
        let image_ref = processor.images().stage(photo_png(12, 12));
        processor.sessions().enqueue_image(&key, image_ref);
    }
    processor
        .sessions()
        .set_sizing(&key, SizingMode::ByWidth, px(16));

    let running = {
        let processor = Arc::clone(&processor);
        let key = key.clone();
        tokio::spawn(async move { processor.process_batch(&key).await })
    };
    remover.wait_for_started(1).await;
    running.abort();
    assert!(running.await.unwrap_err().is_cancelled());

    // The image parked in the remover is released once its worker returns.
    remover.open();
    for _ in 0..200 {
        if processor.images().staged_count() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(processor.images().staged_count(), 0);
    assert_eq!(remover.started(), 1);
    assert!(processor.sessions().get_or_create(&key).queued_images.is_empty());
}
