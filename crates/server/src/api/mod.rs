pub mod common;
pub mod cron;
pub mod health;
pub mod tasks;
pub mod webhooks;

pub use cron::cron_tick;
pub use health::health;
pub use tasks::{
    tasks_create, tasks_delete, tasks_disable, tasks_enable, tasks_get, tasks_list,
    tasks_trigger, tasks_update,
};
pub use webhooks::webhook_receive;
