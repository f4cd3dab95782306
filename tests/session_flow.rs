mod common;

use coinbox_session::config::types::Preferences;
use coinbox_session::device::types::Channel;
use coinbox_session::error::SessionError;
use coinbox_session::DispensedCoins;

use common::Harness;

const START_COIN_SESSION: [u8; 4] = [0x01, 0x00, 0x00, 0x00];

#[tokio::test(start_paused = true)]
async fn wait_resolves_once_threshold_is_reached() {
    let harness = Harness::bound().await;

    let session = harness.session.clone();
    let wait = tokio::spawn(async move { session.wait_for_coins(5).await });
    harness.wait_write(&START_COIN_SESSION).await;

    harness.radio.notify_coin_total(1);
    harness.radio.notify_coin_total(3);
    harness.wait_status(|status| status.coin_total == 3).await;
    assert!(!wait.is_finished());

    harness.radio.notify_coin_total(5);
    assert_eq!(wait.await.unwrap().unwrap(), 5);
    assert_eq!(harness.session.current_status().coin_total, 5);

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn wait_resolves_with_overshooting_total() {
    let harness = Harness::bound().await;

    let session = harness.session.clone();
    let wait = tokio::spawn(async move { session.wait_for_coins(2).await });
    harness.wait_write(&START_COIN_SESSION).await;

    harness.radio.notify_coin_total(4);
    assert_eq!(wait.await.unwrap().unwrap(), 4);

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn new_coin_session_resets_displayed_total() {
    let harness = Harness::bound().await;

    harness.radio.notify_coin_total(7);
    harness.wait_status(|status| status.coin_total == 7).await;

    let session = harness.session.clone();
    let wait = tokio::spawn(async move { session.wait_for_coins(2).await });
    harness.wait_status(|status| status.coin_total == 0).await;
    harness.wait_write(&START_COIN_SESSION).await;

    harness.radio.notify_coin_total(2);
    assert_eq!(wait.await.unwrap().unwrap(), 2);

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn short_coin_frame_is_ignored() {
    let harness = Harness::bound().await;

    let session = harness.session.clone();
    let wait = tokio::spawn(async move { session.wait_for_coins(5).await });
    harness.wait_write(&START_COIN_SESSION).await;

    // would read as 5 if a single byte were accepted
    harness.radio.notify(Channel::CoinCount, &[0x05]);
    harness.radio.notify_coin_total(4);
    harness.wait_status(|status| status.coin_total == 4).await;
    assert!(!wait.is_finished());

    harness.radio.notify_coin_total(5);
    assert_eq!(wait.await.unwrap().unwrap(), 5);

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn payout_resolves_on_completion_event() {
    let harness = Harness::bound().await;

    let session = harness.session.clone();
    let payout = tokio::spawn(async move { session.request_payout(300).await });
    harness.wait_write(&[0x02, 0x2C, 0x01]).await;

    // too short to carry a count
    harness.radio.notify(Channel::Status, &[0x10, 0x2C]);
    // unrelated status event
    harness.radio.notify(Channel::Status, &[0x42, 0x01, 0x00]);
    harness.radio.notify_coin_total(1);
    harness.wait_status(|status| status.coin_total == 1).await;
    assert!(!payout.is_finished());

    harness.radio.notify(Channel::Status, &[0x10, 0x2C, 0x01]);
    let dispensed = payout.await.unwrap().unwrap();
    assert_eq!(dispensed, DispensedCoins { ones: 300, fives: 0, tens: 0 });
    assert_eq!(dispensed.as_tuple(), (300, 0, 0));

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn payout_amount_is_clamped_on_the_wire() {
    let harness = Harness::bound().await;

    let session = harness.session.clone();
    let payout = tokio::spawn(async move { session.request_payout(70_000).await });
    harness.wait_write(&[0x02, 0xFF, 0xFF]).await;

    harness.radio.notify_payout_completed(u16::MAX);
    assert_eq!(payout.await.unwrap().unwrap().ones, u16::MAX);

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn firmware_simulation_round_trip() {
    let harness = Harness::bound().await;
    harness.radio.simulate_firmware(true);

    let session = harness.session.clone();
    let wait = tokio::spawn(async move { session.wait_for_coins(3).await });
    harness.wait_write(&START_COIN_SESSION).await;

    harness.radio.insert_coins(1);
    harness.radio.insert_coins(2);
    assert_eq!(wait.await.unwrap().unwrap(), 3);

    let dispensed = harness.session.request_payout(12).await.unwrap();
    assert_eq!(dispensed, DispensedCoins::single(12));

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn second_wait_is_rejected_while_armed() {
    let harness = Harness::bound().await;

    let session = harness.session.clone();
    let first = tokio::spawn(async move { session.wait_for_coins(5).await });
    harness.wait_write(&START_COIN_SESSION).await;

    let second = harness.session.wait_for_coins(2).await;
    assert!(matches!(second, Err(SessionError::WaitInProgress)));
    assert_eq!(harness.radio.writes().len(), 1);

    harness.radio.notify_coin_total(5);
    assert_eq!(first.await.unwrap().unwrap(), 5);

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn second_payout_is_rejected_while_outstanding() {
    let harness = Harness::bound().await;

    let session = harness.session.clone();
    let first = tokio::spawn(async move { session.request_payout(4).await });
    harness.wait_write(&[0x02, 0x04, 0x00]).await;

    let second = harness.session.request_payout(9).await;
    assert!(matches!(second, Err(SessionError::PayoutInProgress)));

    harness.radio.notify_payout_completed(4);
    assert_eq!(first.await.unwrap().unwrap().ones, 4);

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn abandoned_wait_does_not_block_the_next_one() {
    let harness = Harness::bound().await;

    let session = harness.session.clone();
    let first = tokio::spawn(async move { session.wait_for_coins(5).await });
    harness.wait_write(&START_COIN_SESSION).await;
    first.abort();
    assert!(first.await.unwrap_err().is_cancelled());

    let session = harness.session.clone();
    let second = tokio::spawn(async move { session.wait_for_coins(1).await });
    harness.wait_write_count(2).await;

    harness.radio.notify_coin_total(1);
    assert_eq!(second.await.unwrap().unwrap(), 1);

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn abandoned_payout_does_not_block_the_next_one() {
    let harness = Harness::bound().await;

    let session = harness.session.clone();
    let first = tokio::spawn(async move { session.request_payout(8).await });
    harness.wait_write(&[0x02, 0x08, 0x00]).await;
    first.abort();
    assert!(first.await.unwrap_err().is_cancelled());

    let session = harness.session.clone();
    let second = tokio::spawn(async move { session.request_payout(2).await });
    harness.wait_write(&[0x02, 0x02, 0x00]).await;

    harness.radio.notify_payout_completed(2);
    assert_eq!(second.await.unwrap().unwrap(), DispensedCoins::single(2));

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn oversized_wait_is_clamped_to_counter_range() {
    let harness = Harness::bound().await;

    let session = harness.session.clone();
    let wait = tokio::spawn(async move { session.wait_for_coins(100_000).await });
    harness.wait_write(&START_COIN_SESSION).await;

    harness.radio.notify_coin_total(u16::MAX);
    assert_eq!(wait.await.unwrap().unwrap(), u16::MAX);

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn requests_fail_fast_when_not_connected() {
    let harness = Harness::start(Preferences::default());

    assert!(matches!(harness.session.wait_for_coins(1).await, Err(SessionError::NotConnected)));
    assert!(matches!(harness.session.request_payout(1).await, Err(SessionError::NotConnected)));
    assert!(harness.radio.writes().is_empty());

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn write_failure_disarms_the_session() {
    let harness = Harness::bound().await;
    harness.radio.fail_writes(true);

    let result = harness.session.wait_for_coins(2).await;
    assert!(matches!(result, Err(SessionError::CommandFailed { .. })));

    let result = harness.session.request_payout(2).await;
    assert!(matches!(result, Err(SessionError::CommandFailed { .. })));

    // nothing is left armed
    harness.radio.fail_writes(false);
    let session = harness.session.clone();
    let wait = tokio::spawn(async move { session.wait_for_coins(1).await });
    harness.wait_write(&START_COIN_SESSION).await;
    harness.radio.notify_coin_total(1);
    assert_eq!(wait.await.unwrap().unwrap(), 1);

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn link_loss_cancels_pending_requests() {
    let harness = Harness::bound().await;

    let session = harness.session.clone();
    let wait = tokio::spawn(async move { session.wait_for_coins(5).await });
    harness.wait_write(&START_COIN_SESSION).await;

    let session = harness.session.clone();
    let payout = tokio::spawn(async move { session.request_payout(3).await });
    harness.wait_write(&[0x02, 0x03, 0x00]).await;

    harness.radio.drop_link();

    assert!(matches!(wait.await.unwrap(), Err(SessionError::Cancelled)));
    assert!(matches!(payout.await.unwrap(), Err(SessionError::Cancelled)));

    // reconnected, a stale notification must not resolve anything new
    harness.wait_status(|status| !status.connected).await;
    harness.wait_status(|status| status.connected).await;
    harness.radio.notify_payout_completed(3);

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn power_off_cancels_pending_wait() {
    let harness = Harness::bound().await;

    let session = harness.session.clone();
    let wait = tokio::spawn(async move { session.wait_for_coins(5).await });
    harness.wait_write(&START_COIN_SESSION).await;

    harness.radio.power(false);
    assert!(matches!(wait.await.unwrap(), Err(SessionError::Cancelled)));

    let status = harness.wait_status(|status| !status.powered_on).await;
    assert!(!status.connected);
    assert_eq!(status.indicator(), "Bluetooth off");

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn reset_displayed_count_keeps_session_armed() {
    let harness = Harness::bound().await;

    let session = harness.session.clone();
    let wait = tokio::spawn(async move { session.wait_for_coins(3).await });
    harness.wait_write(&START_COIN_SESSION).await;

    harness.radio.notify_coin_total(2);
    harness.wait_status(|status| status.coin_total == 2).await;

    harness.session.reset_displayed_coin_count().await.unwrap();
    harness.wait_status(|status| status.coin_total == 0).await;
    assert!(!wait.is_finished());

    harness.radio.notify_coin_total(3);
    assert_eq!(wait.await.unwrap().unwrap(), 3);

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn shutdown_closes_pending_requests() {
    let harness = Harness::bound().await;

    let session = harness.session.clone();
    let wait = tokio::spawn(async move { session.wait_for_coins(5).await });
    harness.wait_write(&START_COIN_SESSION).await;

    let session = harness.session.clone();
    let radio = harness.radio.clone();
    harness.stop().await;

    assert!(matches!(wait.await.unwrap(), Err(SessionError::SessionClosed)));
    assert!(matches!(session.wait_for_coins(1).await, Err(SessionError::SessionClosed)));
    assert_eq!(radio.bound(), None);
}
