mod dispatch;
mod tasks;
