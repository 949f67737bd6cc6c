//! The application contract.
//!
//! An [`Application`] is called once per connection with the request's
//! [`RequestFields`] and answers with a status, headers and a [`ResponseBody`].
//! Plain async functions can be adapted with [`make_application`].

use std::error::Error;

use async_trait::async_trait;
use http::Response;

use crate::protocol::{RequestFields, ResponseBody};

#[async_trait]
pub trait Application: Send + Sync {
    type Error: Into<Box<dyn Error + Send + Sync>>;

    async fn call(&self, req: RequestFields) -> Result<Response<ResponseBody>, Self::Error>;
}

#[derive(Debug)]
pub struct ApplicationFn<F> {
    f: F,
}

#[async_trait]
impl<Err, F, Fut> Application for ApplicationFn<F>
where
    F: Fn(RequestFields) -> Fut + Send + Sync,
    Err: Into<Box<dyn Error + Send + Sync>>,
    Fut: Future<Output = Result<Response<ResponseBody>, Err>> + Send,
{
    type Error = Err;

    async fn call(&self, req: RequestFields) -> Result<Response<ResponseBody>, Self::Error> {
        (self.f)(req).await
    }
}

pub fn make_application<F, Err, Ret>(f: F) -> ApplicationFn<F>
where
    Err: Into<Box<dyn Error + Send + Sync>>,
    Ret: Future<Output = Result<Response<ResponseBody>, Err>>,
    F: Fn(RequestFields) -> Ret,
{
    ApplicationFn { f }
}
