//! A producer over an in-memory iterator or cursor.

use std::sync::{Arc, Mutex};

use crate::event_loop::EventLoop;
use crate::protocol::{attach, Downstream, InputStream, OutputStream, Producer};

struct IterState<It: Iterator> {
    downstream: Downstream<It::Item>,
    items: It,
}

impl<It> IterState<It>
where
    It: Iterator + Send + 'static,
    It::Item: Send + 'static,
{
    /// Pull items only against credit. The end of the source is only
    /// discovered, and the stream closed, when credit is left over.
    fn drain(&mut self) {
        while self.downstream.is_open() && !self.downstream.credit().is_zero() {
            let Some(item) = self.items.next() else {
                self.downstream.close();
                return;
            };
            if self.downstream.push(item).is_err() {
                return;
            }
        }
    }
}

impl<It> Producer for IterState<It>
where
    It: Iterator + Send + 'static,
    It::Item: Send + 'static,
{
    type Output = It::Item;

    fn downstream(&mut self) -> &mut Downstream<It::Item> {
        &mut self.downstream
    }

    fn on_request(&mut self, count: usize) {
        self.downstream.grant(count);
        self.drain();
    }
}

/// Emits the items of an iterator, one per unit of credit, then closes.
///
/// The iterator is never advanced without outstanding credit, so a lazy
/// cursor produces nothing before it is asked to.
pub struct IterStream<It: Iterator> {
    state: Arc<Mutex<IterState<It>>>,
    event_loop: EventLoop,
}

impl<It> IterStream<It>
where
    It: Iterator + Send + 'static,
    It::Item: Send + 'static,
{
    pub fn new<T>(items: T, event_loop: &EventLoop) -> Self
    where
        T: IntoIterator<IntoIter = It>,
    {
        Self {
            state: Arc::new(Mutex::new(IterState {
                downstream: Downstream::new(),
                items: items.into_iter(),
            })),
            event_loop: event_loop.clone(),
        }
    }
}

impl<It> OutputStream<It::Item> for IterStream<It>
where
    It: Iterator + Send + 'static,
    It::Item: Send + 'static,
{
    fn output(&self, consumer: Box<dyn InputStream<It::Item>>) {
        attach(&self.state, &self.event_loop, consumer);
    }
}
