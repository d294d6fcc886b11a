// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Timer-based suspension.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use crate::runtime::context;
use crate::runtime::reactor::{Reactor, TimerKey};

/// Future that completes at a deadline.
pub struct Sleep {
    deadline: Instant,
    timer: Option<(Arc<Reactor>, TimerKey)>,
}

impl Sleep {
    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

impl Future for Sleep {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if Instant::now() >= self.deadline {
            if let Some((reactor, key)) = self.timer.take() {
                reactor.cancel_timer(key);
            }
            return Poll::Ready(());
        }

        match &self.timer {
            Some((reactor, key)) => {
                if !reactor.update_timer(*key, cx.waker()) {
                    // Fired but the clock disagrees by a hair; re-arm.
                    let key = reactor.add_timer(self.deadline, cx.waker());
                    let reactor = reactor.clone();
                    self.timer = Some((reactor, key));
                }
            }
            None => {
                let reactor = context::core().reactor().clone();
                let key = reactor.add_timer(self.deadline, cx.waker());
                self.timer = Some((reactor, key));
            }
        }
        Poll::Pending
    }
}

impl Drop for Sleep {
    fn drop(&mut self) {
        if let Some((reactor, key)) = self.timer.take() {
            reactor.cancel_timer(key);
        }
    }
}

/// Suspend the calling unit for `duration`.
pub fn sleep(duration: Duration) -> Sleep {
    sleep_until(Instant::now() + duration)
}

pub fn sleep_until(deadline: Instant) -> Sleep {
    Sleep {
        deadline,
        timer: None,
    }
}
